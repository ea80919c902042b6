//! The decision flow for flags and experiments.
mod decision_service;
mod feature_decision;
mod options;
mod reasons;

pub use decision_service::{BanditTrafficPolicy, DecisionService, DecisionServiceConfig};
pub use feature_decision::{DecisionSource, FeatureDecision};
pub use options::{DecideOption, DecideOptions};
pub use reasons::DecisionReasons;
