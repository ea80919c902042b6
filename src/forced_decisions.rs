//! Explicit overrides of the normal decision flow.
//!
//! There are two independent layers:
//! - forced decisions, set on a [`UserContext`](crate::UserContext) for a flag or for one rule of
//!   a flag;
//! - forced variations for plain experiments, either set by the host through the client or
//!   shipped in the configuration as a per-experiment whitelist.
//!
//! Overrides that point at variations missing from the current configuration are ignored.
use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::Mutex,
};

use crate::{
    decision::DecisionReasons,
    project::{Experiment, ProjectConfig, Targetable, Variation},
    Error, Result,
};

/// Key of a forced decision: a flag, optionally narrowed to one of its rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForcedDecisionKey {
    pub flag_key: String,
    pub rule_key: Option<String>,
}

impl ForcedDecisionKey {
    /// Forced decision for the whole flag.
    pub fn flag(flag_key: impl Into<String>) -> Self {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: None,
        }
    }

    /// Forced decision for one experiment or rollout rule of a flag.
    pub fn rule(flag_key: impl Into<String>, rule_key: impl Into<String>) -> Self {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: Some(rule_key.into()),
        }
    }
}

impl Display for ForcedDecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flag ({})", self.flag_key)?;
        if let Some(rule_key) = &self.rule_key {
            write!(f, ", rule ({rule_key})")?;
        }
        Ok(())
    }
}

/// Forced decisions of one user context: key to variation key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedDecisions {
    decisions: HashMap<ForcedDecisionKey, String>,
}

impl ForcedDecisions {
    pub fn new() -> Self {
        ForcedDecisions::default()
    }

    /// Set a forced decision, replacing any previous one for the same key.
    pub fn set(&mut self, key: ForcedDecisionKey, variation_key: impl Into<String>) {
        self.decisions.insert(key, variation_key.into());
    }

    pub fn get(&self, key: &ForcedDecisionKey) -> Option<&str> {
        self.decisions.get(key).map(String::as_str)
    }

    /// Returns whether a forced decision was removed.
    pub fn remove(&mut self, key: &ForcedDecisionKey) -> bool {
        self.decisions.remove(key).is_some()
    }

    pub fn remove_all(&mut self) {
        self.decisions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Resolve the forced decision for `key` against the configuration.
    ///
    /// Returns `None` when there is no forced decision or when its variation does not exist in
    /// the flag anymore. The latter is recorded as a reason.
    pub(crate) fn resolve<'a>(
        &self,
        config: &'a ProjectConfig,
        key: &ForcedDecisionKey,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let variation_key = self.get(key)?;
        match config.flag_variation(&key.flag_key, variation_key) {
            Some(variation) => {
                reasons.add_info(format!(
                    "Variation ({variation_key}) is mapped to {key} and user ({user_id}) in the forced decision map."
                ));
                Some(variation)
            }
            None => {
                reasons.add_info(format!(
                    "Invalid variation is mapped to {key} and user ({user_id}) in the forced decision map."
                ));
                None
            }
        }
    }
}

/// Forced variations set by the host for plain experiments.
///
/// Stored by ids, outside of the configuration snapshot, so they survive configuration updates.
/// Ids that no longer resolve are ignored.
#[derive(Debug, Default)]
pub struct ForcedVariations {
    /// user id -> experiment id -> variation id
    variations: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl ForcedVariations {
    pub fn new() -> Self {
        ForcedVariations::default()
    }

    /// Force `user_id` into `variation_key` of the experiment, or clear the override with `None`.
    pub fn set(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_key.to_owned()))?;

        let mut variations = self
            .variations
            .lock()
            .expect("thread holding forced variations lock should not panic");

        let Some(variation_key) = variation_key else {
            if let Some(user_variations) = variations.get_mut(user_id) {
                user_variations.remove(&experiment.id);
            }
            log::debug!(target: "decision_core", experiment_key, user_id;
                "removed forced variation");
            return Ok(());
        };

        let variation = experiment.variation_by_key(variation_key).ok_or_else(|| {
            Error::VariationNotFound {
                experiment_key: experiment_key.to_owned(),
                variation_key: variation_key.to_owned(),
            }
        })?;

        variations
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment.id.clone(), variation.id.clone());
        log::debug!(target: "decision_core", experiment_key, user_id, variation_key;
            "set forced variation");
        Ok(())
    }

    /// The forced variation of `user_id` in `experiment`, if one is set and still valid.
    pub fn get<'a>(
        &self,
        experiment: &'a Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let variation_id = {
            let variations = self
                .variations
                .lock()
                .expect("thread holding forced variations lock should not panic");
            variations.get(user_id)?.get(&experiment.id)?.clone()
        };

        match experiment.variation_by_id(&variation_id) {
            Some(variation) => {
                reasons.add_info(format!(
                    "Variation ({}) is mapped to experiment ({}) and user ({user_id}) in the forced variation map.",
                    variation.key, experiment.key
                ));
                Some(variation)
            }
            None => {
                reasons.add_info(format!(
                    "Forced variation ({variation_id}) of experiment ({}) for user ({user_id}) is not in the configuration.",
                    experiment.key
                ));
                None
            }
        }
    }
}

/// The whitelisted variation of `user_id` shipped with the experiment, if valid.
pub(crate) fn whitelisted_variation<'a>(
    experiment: &'a Experiment,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_key = experiment.forced_variations.get(user_id)?;
    match experiment.variation_by_key(variation_key) {
        Some(variation) => {
            reasons.add_info(format!(
                "Forced variation ({variation_key}) is found for user ({user_id})"
            ));
            Some(variation)
        }
        None => {
            reasons.add_info(format!(
                "Forced variation ({variation_key}) is found for user ({user_id}), but it's not in the configuration."
            ));
            None
        }
    }
}
