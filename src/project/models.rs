use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::audience::{deserialize_embedded_conditions, ConditionNode};

/// Project configuration as published by the server (the "datafile").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    #[serde(default)]
    pub version: String,
    /// Revision identifier of this configuration.
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    /// Mutually-exclusive experiment groups. Group experiments are listed here, not in
    /// `experiments`.
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub audiences: Vec<Audience>,
    /// Audiences using the typed condition format. Take precedence over `audiences` with the
    /// same id.
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    /// Holdouts in precedence order.
    #[serde(default)]
    pub holdouts: Vec<Holdout>,
    /// Whether decisions served by rollouts (or no rule at all) should produce impressions.
    #[serde(default)]
    pub send_flag_decisions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ExperimentStatus {
    Running,
    Launched,
    Paused,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
    /// Status this version does not know about. Never running.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum HoldoutStatus {
    Draft,
    Running,
    Concluded,
    Archived,
    #[serde(other)]
    Unknown,
}

/// An A/B test, a feature test, or a rollout rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    /// When present, used instead of `audience_ids`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_conditions: Option<ConditionNode>,
    /// Server-side whitelist: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    /// Present when the variation is chosen by a contextual bandit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmab: Option<BanditConfig>,
}

/// Marks an experiment as bandit-driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditConfig {
    /// End of the single traffic range that admits users into the bandit.
    pub traffic_allocation: u32,
    /// Ids of the attributes sent to the bandit.
    #[serde(default)]
    pub attribute_ids: Vec<String>,
}

/// A rule applied across flags that withholds users from experimentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holdout {
    pub id: String,
    pub key: String,
    pub status: HoldoutStatus,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_conditions: Option<ConditionNode>,
    /// Flag ids this holdout is limited to. Empty means all flags.
    #[serde(default)]
    pub included_flags: Vec<String>,
    /// Flag ids this holdout never applies to.
    #[serde(default)]
    pub excluded_flags: Vec<String>,
}

impl Holdout {
    /// Whether the holdout applies to the flag with the given id.
    pub fn applies_to(&self, flag_id: &str) -> bool {
        (self.included_flags.is_empty() || self.included_flags.iter().any(|id| id == flag_id))
            && !self.excluded_flags.iter().any(|id| id == flag_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_enabled: Option<bool>,
    /// Variable overrides of this variation.
    #[serde(default)]
    pub variables: Vec<VariableUsage>,
}

impl Variation {
    pub fn is_feature_enabled(&self) -> bool {
        self.feature_enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableUsage {
    pub id: String,
    pub value: String,
}

/// One cumulative traffic range. Users with a bucket value below `end_of_range` (and not below
/// the previous range) land in `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Users are bucketed into at most one experiment of the group.
    Random,
    /// Experiments of the group are bucketed independently.
    Overlapping,
    /// Policy this release does not know; handled like `Overlapping`.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    /// Ranges whose entity ids are experiment ids.
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub rollout_id: String,
    /// Feature tests in evaluation order.
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

/// Ordered targeting rules of a flag. The last rule is the "Everyone Else" fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub default_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum VariableType {
    String,
    Integer,
    Double,
    Boolean,
    Json,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "deserialize_embedded_conditions")]
    pub conditions: ConditionNode,
}
