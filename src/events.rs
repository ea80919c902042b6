//! Decision records handed to the host after every decision.
//!
//! The engine does not serialize or send these records. It only states whether an impression
//! should be dispatched; batching and delivery belong to the host.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{decision::DecisionSource, Attributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionType {
    /// A flag decided through the decide API.
    Flag,
    /// A plain experiment looked up by key.
    AbTest,
}

/// Everything the engine knows about one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    pub decision_type: DecisionType,
    pub user_id: String,
    pub attributes: Attributes,
    /// Flag key for flag decisions, experiment key for A/B tests.
    pub flag_key: String,
    pub rule_key: Option<String>,
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub source: Option<DecisionSource>,
    /// Typed flag variables, unless excluded.
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub reasons: Vec<String>,
    /// Identifies a bandit decision, if a bandit made it.
    pub bandit_uuid: Option<String>,
    /// Whether an impression should be dispatched for this decision.
    pub dispatch_impression: bool,
    pub timestamp: DateTime<Utc>,
}

/// Receives a [`DecisionEvent`] after every decision.
pub trait DecisionListener: Send + Sync {
    fn on_decision(&self, event: DecisionEvent);
}

/// Discards all decision events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDecisionListener;

impl DecisionListener for NoopDecisionListener {
    fn on_decision(&self, _event: DecisionEvent) {}
}

impl<T: Fn(DecisionEvent) + Send + Sync> DecisionListener for T {
    fn on_decision(&self, event: DecisionEvent) {
        self(event);
    }
}
