use serde::{Deserialize, Serialize};

use crate::project::{Targetable, Variation};

/// Which stage of the decision flow produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// Flag-level forced decision.
    Forced,
    Holdout,
    FeatureTest,
    Rollout,
}

/// Outcome of resolving a flag for a user.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDecision {
    /// Id of the rule (experiment, rollout rule, or holdout) that decided.
    pub rule_id: Option<String>,
    pub rule_key: Option<String>,
    pub variation: Option<Variation>,
    pub source: DecisionSource,
    /// Set when a bandit chose the variation.
    pub bandit_uuid: Option<String>,
}

impl FeatureDecision {
    pub(crate) fn forced(variation: &Variation) -> FeatureDecision {
        FeatureDecision {
            rule_id: None,
            rule_key: None,
            variation: Some(variation.clone()),
            source: DecisionSource::Forced,
            bandit_uuid: None,
        }
    }

    pub(crate) fn from_rule<T: Targetable + ?Sized>(
        rule: &T,
        variation: &Variation,
        source: DecisionSource,
    ) -> FeatureDecision {
        FeatureDecision {
            rule_id: Some(rule.id().to_owned()),
            rule_key: Some(rule.key().to_owned()),
            variation: Some(variation.clone()),
            source,
            bandit_uuid: None,
        }
    }

    /// No rule served the user.
    pub(crate) fn none() -> FeatureDecision {
        FeatureDecision {
            rule_id: None,
            rule_key: None,
            variation: None,
            source: DecisionSource::Rollout,
            bandit_uuid: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.variation
            .as_ref()
            .is_some_and(Variation::is_feature_enabled)
    }
}
