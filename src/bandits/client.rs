use async_trait::async_trait;

use crate::Attributes;

/// Error obtaining a bandit decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BanditError {
    /// Request to the bandit service failed.
    #[error("failed to fetch bandit decision: {0}")]
    FetchFailed(String),

    /// Bandit service answered with a response that has no usable prediction.
    #[error("invalid bandit prediction response")]
    InvalidResponse,

    /// An experiment needs a bandit decision but no bandit client is configured.
    #[error("no bandit client is configured")]
    NoClient,
}

/// External service that picks a variation for a bandit experiment.
///
/// Retries and timeouts, if any, are the client's responsibility.
#[async_trait]
pub trait BanditClient: Send + Sync {
    /// Returns the id of the chosen variation.
    ///
    /// `attributes` are already filtered down to the attributes the bandit consults.
    /// `decision_uuid` identifies this decision in analytics.
    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        decision_uuid: &str,
    ) -> Result<String, BanditError>;
}
