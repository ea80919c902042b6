use crate::audience::ConditionNode;

use super::{
    Experiment, ExperimentStatus, Holdout, HoldoutStatus, TrafficAllocation, Variation,
};

/// Shared capability of rules a user can be targeted and bucketed into.
///
/// Audience evaluation and bucketing only see this trait, so experiments, rollout rules, and
/// holdouts all go through the same code.
pub trait Targetable {
    fn id(&self) -> &str;

    fn key(&self) -> &str;

    /// Only running rules can match.
    fn is_running(&self) -> bool;

    fn variations(&self) -> &[Variation];

    fn traffic_allocation(&self) -> &[TrafficAllocation];

    fn audience_ids(&self) -> &[String];

    fn audience_conditions(&self) -> Option<&ConditionNode>;

    fn variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations().iter().find(|v| v.id == id)
    }

    fn variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations().iter().find(|v| v.key == key)
    }
}

impl Targetable for Experiment {
    fn id(&self) -> &str {
        &self.id
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    fn variations(&self) -> &[Variation] {
        &self.variations
    }

    fn traffic_allocation(&self) -> &[TrafficAllocation] {
        &self.traffic_allocation
    }

    fn audience_ids(&self) -> &[String] {
        &self.audience_ids
    }

    fn audience_conditions(&self) -> Option<&ConditionNode> {
        self.audience_conditions.as_ref()
    }
}

impl Targetable for Holdout {
    fn id(&self) -> &str {
        &self.id
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn is_running(&self) -> bool {
        self.status == HoldoutStatus::Running
    }

    fn variations(&self) -> &[Variation] {
        &self.variations
    }

    fn traffic_allocation(&self) -> &[TrafficAllocation] {
        &self.traffic_allocation
    }

    fn audience_ids(&self) -> &[String] {
        &self.audience_ids
    }

    fn audience_conditions(&self) -> Option<&ConditionNode> {
        self.audience_conditions.as_ref()
    }
}
