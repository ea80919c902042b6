//! Holdouts withhold a slice of users from experimentation on one or more flags.
//!
//! Holdouts are tried in configuration order and the first one that both targets and buckets the
//! user wins. A bucketing miss moves on to the next holdout; holdouts have no fallback rule.
use crate::{
    attributes::bucketing_id,
    audience::rule_matches,
    bucketer::Bucketer,
    decision::DecisionReasons,
    project::{FeatureFlag, Holdout, ProjectConfig, Targetable, Variation},
    Attributes,
};

/// Find the holdout (and its variation) the user falls into for `flag`, if any.
pub fn resolve<'a>(
    config: &'a ProjectConfig,
    bucketer: &Bucketer,
    flag: &FeatureFlag,
    user_id: &str,
    attributes: &Attributes,
    reasons: &mut DecisionReasons,
) -> Option<(&'a Holdout, &'a Variation)> {
    let bucketing_id = bucketing_id(user_id, attributes);

    for holdout in config.holdouts() {
        if !holdout.applies_to(&flag.id) {
            continue;
        }
        if !holdout.is_running() {
            reasons.add_info(format!("Holdout ({}) is not running.", holdout.key));
            continue;
        }
        if holdout.variations.is_empty() || holdout.traffic_allocation.is_empty() {
            log::trace!(target: "decision_core", holdout_key = holdout.key.as_str();
                "skipping holdout without variations or traffic");
            continue;
        }

        if !rule_matches(config, holdout, &holdout.key, attributes, reasons) {
            reasons.add_info(format!(
                "User ({user_id}) does not meet conditions for holdout ({}).",
                holdout.key
            ));
            continue;
        }

        match bucketer.bucket_to_variation(holdout, bucketing_id, reasons) {
            Some(variation) => {
                reasons.add_info(format!(
                    "User ({user_id}) is in variation ({}) of holdout ({}).",
                    variation.key, holdout.key
                ));
                return Some((holdout, variation));
            }
            None => {
                reasons.add_info(format!(
                    "User ({user_id}) is in no holdout variation of holdout ({}).",
                    holdout.key
                ));
            }
        }
    }

    None
}
