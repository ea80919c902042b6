//! Contextual bandit decisions.
//!
//! Some experiments delegate the choice of variation to an external model service. The engine
//! only talks to that service through [`BanditClient`]; [`BanditService`] filters the attributes
//! the bandit may see and memoizes its answers in a [`BanditCache`] keyed by user and rule, as
//! long as the relevant attributes do not change.
mod cache;
mod client;
mod http_client;
mod service;

pub use cache::{BanditCache, BanditCacheConfig, BanditCacheOptions, CachedDecision};
pub use client::{BanditClient, BanditError};
pub use http_client::{HttpBanditClient, HttpBanditClientConfig, RetryConfig};
pub use service::{hash_attributes, BanditDecision, BanditService};
