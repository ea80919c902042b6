//! Project configuration: the immutable snapshot every decision is made against.
//!
//! [`Datafile`] mirrors the JSON document published by the server. [`ProjectConfig`] is compiled
//! from it once and indexes everything the decision engine looks up by id or key. A new datafile
//! produces a new `ProjectConfig`; snapshots are never patched in place.
use std::collections::HashMap;

use crate::{Error, Result};

mod models;
mod targetable;

pub use models::*;
pub use targetable::Targetable;

/// Compiled, read-only project configuration.
#[derive(Debug)]
pub struct ProjectConfig {
    revision: String,
    send_flag_decisions: bool,
    /// Experiments and group experiments by id. Rollout rules are not included.
    experiments: HashMap<String, Experiment>,
    experiment_ids_by_key: HashMap<String, String>,
    /// Groups by id. `Group::experiments` is moved into `experiments` and left empty here.
    groups: HashMap<String, Group>,
    group_ids_by_experiment_id: HashMap<String, String>,
    /// Flags in configuration order.
    flags: Vec<FeatureFlag>,
    flag_indices_by_key: HashMap<String, usize>,
    rollouts: HashMap<String, Rollout>,
    attribute_keys_by_id: HashMap<String, String>,
    audiences: HashMap<String, Audience>,
    /// Holdouts in precedence order.
    holdouts: Vec<Holdout>,
    /// Every variation reachable from a flag (feature tests and rollout rules), keyed by flag key
    /// and variation key.
    flag_variations: HashMap<String, HashMap<String, Variation>>,
}

impl ProjectConfig {
    /// Compile a datafile into a snapshot.
    pub fn new(datafile: Datafile) -> ProjectConfig {
        let Datafile {
            version: _,
            revision,
            experiments: top_level_experiments,
            groups: datafile_groups,
            feature_flags,
            rollouts: datafile_rollouts,
            attributes,
            audiences: legacy_audiences,
            typed_audiences,
            holdouts,
            send_flag_decisions,
        } = datafile;

        let mut experiments = HashMap::new();
        let mut experiment_ids_by_key = HashMap::new();
        let mut group_ids_by_experiment_id = HashMap::new();
        let mut groups = HashMap::new();

        let mut add_experiment = |experiment: Experiment| {
            experiment_ids_by_key.insert(experiment.key.clone(), experiment.id.clone());
            experiments.insert(experiment.id.clone(), experiment);
        };

        for experiment in top_level_experiments {
            add_experiment(experiment);
        }
        for mut group in datafile_groups {
            for experiment in std::mem::take(&mut group.experiments) {
                group_ids_by_experiment_id.insert(experiment.id.clone(), group.id.clone());
                add_experiment(experiment);
            }
            groups.insert(group.id.clone(), group);
        }

        let rollouts: HashMap<String, Rollout> = datafile_rollouts
            .into_iter()
            .map(|rollout| (rollout.id.clone(), rollout))
            .collect();

        let mut flag_variations = HashMap::new();
        for flag in &feature_flags {
            let mut variations = HashMap::new();
            let experiment_variations = flag
                .experiment_ids
                .iter()
                .filter_map(|id| experiments.get(id))
                .flat_map(|experiment| experiment.variations.iter());
            let rollout_variations = rollouts
                .get(&flag.rollout_id)
                .into_iter()
                .flat_map(|rollout| rollout.experiments.iter())
                .flat_map(|rule| rule.variations.iter());
            for variation in experiment_variations.chain(rollout_variations) {
                variations
                    .entry(variation.key.clone())
                    .or_insert_with(|| variation.clone());
            }
            flag_variations.insert(flag.key.clone(), variations);
        }

        let flag_indices_by_key = feature_flags
            .iter()
            .enumerate()
            .map(|(idx, flag)| (flag.key.clone(), idx))
            .collect();

        let attribute_keys_by_id = attributes
            .into_iter()
            .map(|attribute| (attribute.id, attribute.key))
            .collect();

        // Typed audiences are inserted last so they win over legacy ones with the same id.
        let audiences = legacy_audiences
            .into_iter()
            .chain(typed_audiences)
            .map(|audience| (audience.id.clone(), audience))
            .collect();

        ProjectConfig {
            revision,
            send_flag_decisions,
            experiments,
            experiment_ids_by_key,
            groups,
            group_ids_by_experiment_id,
            flags: feature_flags,
            flag_indices_by_key,
            rollouts,
            attribute_keys_by_id,
            audiences,
            holdouts,
            flag_variations,
        }
    }

    /// Deserialize and compile a datafile.
    pub fn from_json(json: &[u8]) -> Result<ProjectConfig> {
        let datafile: Datafile = serde_json::from_slice(json).map_err(|err| {
            log::warn!(target: "decision_core", "failed to parse project configuration: {err}");
            Error::InvalidConfiguration(err.to_string())
        })?;
        log::debug!(target: "decision_core", revision = datafile.revision.as_str();
            "compiled project configuration");
        Ok(ProjectConfig::new(datafile))
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn send_flag_decisions(&self) -> bool {
        self.send_flag_decisions
    }

    pub fn experiment(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    pub fn experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_ids_by_key
            .get(key)
            .and_then(|id| self.experiments.get(id))
    }

    /// The group an experiment belongs to, if any.
    pub fn group_for_experiment(&self, experiment_id: &str) -> Option<&Group> {
        self.group_ids_by_experiment_id
            .get(experiment_id)
            .and_then(|group_id| self.groups.get(group_id))
    }

    pub fn flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.flag_indices_by_key
            .get(key)
            .map(|&idx| &self.flags[idx])
    }

    /// All flags in configuration order.
    pub fn flags(&self) -> &[FeatureFlag] {
        &self.flags
    }

    pub fn rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }

    pub fn attribute_key(&self, attribute_id: &str) -> Option<&str> {
        self.attribute_keys_by_id.get(attribute_id).map(String::as_str)
    }

    pub fn audience(&self, id: &str) -> Option<&Audience> {
        self.audiences.get(id)
    }

    /// All holdouts in precedence order.
    pub fn holdouts(&self) -> &[Holdout] {
        &self.holdouts
    }

    /// Look up a variation by key among all rules of a flag.
    pub fn flag_variation(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations.get(flag_key)?.get(variation_key)
    }
}
