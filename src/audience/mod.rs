//! Audience targeting: condition trees evaluated with three-valued logic.
//!
//! Every evaluation returns `Option<bool>` where `None` means unknown. Errors inside a leaf (a
//! missing attribute, a malformed condition) make that leaf unknown and are recorded as a reason;
//! they never abort the decision. A rule matches a user only when its audience evaluates to
//! exactly `Some(true)`.
use crate::{
    decision::DecisionReasons,
    project::{ProjectConfig, Targetable},
    Attributes,
};

mod condition;
mod matchers;
mod semantic_version;

pub(crate) use condition::{deserialize_embedded_conditions, Leaf};
pub use condition::{AttributeCondition, ConditionNode};
pub use matchers::{Comparator, Comparison, ConditionError, MatchType};

impl ConditionNode {
    /// Evaluate a tree of attribute conditions against user attributes.
    ///
    /// Audience id references cannot be resolved without a configuration and evaluate to unknown.
    /// Use [`rule_matches`] to evaluate a rule's audiences.
    pub fn evaluate(&self, attributes: &Attributes) -> Option<bool> {
        self.evaluate_with(&mut |leaf| match leaf {
            Leaf::Attribute(condition) => condition.evaluate(attributes).ok(),
            Leaf::AudienceId(_) | Leaf::Invalid(_) => None,
        })
    }
}

/// Whether the user satisfies the audience targeting of `rule`.
///
/// The rule's condition tree is used when present. Otherwise an `or` over its audience ids is
/// synthesized. No targeting at all matches everyone. `logging_key` names the rule in reasons
/// (rollout fallback rules are reported as "Everyone Else").
pub(crate) fn rule_matches<T: Targetable + ?Sized>(
    config: &ProjectConfig,
    rule: &T,
    logging_key: &str,
    attributes: &Attributes,
    reasons: &mut DecisionReasons,
) -> bool {
    let synthesized;
    let conditions = match rule.audience_conditions() {
        Some(conditions) => conditions,
        None => {
            synthesized = ConditionNode::any_of_audiences(rule.audience_ids());
            &synthesized
        }
    };

    log::trace!(target: "decision_core", rule_key = logging_key;
        "evaluating audiences {conditions}");

    let result = conditions.evaluate_with(&mut |leaf| match leaf {
        Leaf::AudienceId(audience_id) => {
            evaluate_audience(config, audience_id, attributes, reasons)
        }
        Leaf::Attribute(condition) => evaluate_leaf(condition, attributes, reasons),
        Leaf::Invalid(value) => {
            reasons.add_info(ConditionError::InvalidConditionShape(value.to_string()));
            None
        }
    });

    reasons.add_info(format!(
        "Audiences for rule ({logging_key}) collectively evaluated to ({}).",
        display_result(result)
    ));

    result == Some(true)
}

fn evaluate_audience(
    config: &ProjectConfig,
    audience_id: &str,
    attributes: &Attributes,
    reasons: &mut DecisionReasons,
) -> Option<bool> {
    let Some(audience) = config.audience(audience_id) else {
        reasons.add_info(ConditionError::AudienceNotFound(audience_id.to_owned()));
        return None;
    };

    let result = audience.conditions.evaluate_with(&mut |leaf| match leaf {
        Leaf::Attribute(condition) => evaluate_leaf(condition, attributes, reasons),
        Leaf::AudienceId(nested) => {
            reasons.add_info(ConditionError::InvalidConditionShape(format!(
                "audience {audience_id} references audience {nested}"
            )));
            None
        }
        Leaf::Invalid(value) => {
            reasons.add_info(ConditionError::InvalidConditionShape(value.to_string()));
            None
        }
    });

    log::debug!(target: "decision_core", audience_id;
        "audience {} evaluated to {}", audience.name, display_result(result));

    result
}

fn evaluate_leaf(
    condition: &AttributeCondition,
    attributes: &Attributes,
    reasons: &mut DecisionReasons,
) -> Option<bool> {
    match condition.evaluate(attributes) {
        Ok(result) => Some(result),
        Err(err) => {
            reasons.add_info(err);
            None
        }
    }
}

fn display_result(result: Option<bool>) -> &'static str {
    match result {
        Some(true) => "TRUE",
        Some(false) => "FALSE",
        None => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::project::Experiment;

    fn config() -> ProjectConfig {
        let datafile = json!({
            "typedAudiences": [
                {"id": "adults", "name": "adults", "conditions": ["and",
                    {"name": "age", "type": "custom_attribute", "match": "ge", "value": 18}]},
                {"id": "us", "name": "us", "conditions": ["or",
                    {"name": "country", "type": "custom_attribute", "match": "exact", "value": "us"}]},
                {"id": "nested", "name": "nested", "conditions": ["or", "adults"]}
            ]
        });
        ProjectConfig::from_json(datafile.to_string().as_bytes()).unwrap()
    }

    fn experiment(extra: serde_json::Value) -> Experiment {
        let mut value = json!({"id": "e", "key": "exp", "status": "Running"});
        value
            .as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        serde_json::from_value(value).unwrap()
    }

    fn attributes(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn no_targeting_matches_everyone() {
        let mut reasons = DecisionReasons::new();
        let rule = experiment(json!({}));
        assert!(rule_matches(&config(), &rule, "exp", &Attributes::new(), &mut reasons));

        let rule = experiment(json!({"audienceConditions": []}));
        assert!(rule_matches(&config(), &rule, "exp", &Attributes::new(), &mut reasons));
    }

    #[test]
    fn audience_ids_are_or_ed() {
        let mut reasons = DecisionReasons::new();
        let rule = experiment(json!({"audienceIds": ["adults", "us"]}));
        let config = config();

        assert!(rule_matches(&config, &rule, "exp", &attributes(json!({"country": "us"})), &mut reasons));
        assert!(rule_matches(&config, &rule, "exp", &attributes(json!({"age": 30})), &mut reasons));
        assert!(!rule_matches(&config, &rule, "exp", &attributes(json!({"age": 3, "country": "ca"})), &mut reasons));
    }

    #[test]
    fn conditions_take_precedence_over_ids() {
        let mut reasons = DecisionReasons::new();
        let rule = experiment(json!({
            "audienceIds": ["us"],
            "audienceConditions": ["and", "adults", "us"]
        }));
        let config = config();

        assert!(!rule_matches(&config, &rule, "exp", &attributes(json!({"country": "us"})), &mut reasons));
        assert!(rule_matches(&config, &rule, "exp", &attributes(json!({"country": "us", "age": 20})), &mut reasons));
    }

    #[test]
    fn unknown_does_not_match() {
        let mut reasons = DecisionReasons::new();
        let rule = experiment(json!({"audienceConditions": ["not", "adults"]}));

        // missing attribute: unknown, negated stays unknown
        assert!(!rule_matches(&config(), &rule, "exp", &Attributes::new(), &mut reasons));
        assert!(reasons
            .infos()
            .iter()
            .any(|r| r.contains("no value was passed for user attribute \"age\"")));
        assert!(reasons
            .infos()
            .iter()
            .any(|r| r == "Audiences for rule (exp) collectively evaluated to (UNKNOWN)."));
    }

    #[test]
    fn unknown_audience_is_recorded() {
        let mut reasons = DecisionReasons::new();
        let rule = experiment(json!({"audienceConditions": ["or", "missing", "us"]}));

        assert!(rule_matches(&config(), &rule, "exp", &attributes(json!({"country": "us"})), &mut reasons));
        assert!(reasons
            .infos()
            .iter()
            .any(|r| r == "audience missing is not in the configuration"));
    }

    #[test]
    fn audiences_cannot_reference_audiences() {
        let mut reasons = DecisionReasons::new();
        let rule = experiment(json!({"audienceIds": ["nested"]}));

        assert!(!rule_matches(&config(), &rule, "exp", &attributes(json!({"age": 40})), &mut reasons));
    }

    #[test]
    fn evaluate_without_configuration() {
        let tree = ConditionNode::from_json(&json!(["and",
            {"name": "age", "type": "custom_attribute", "match": "gt", "value": 1},
            "some-audience"]));
        assert_eq!(tree.evaluate(&attributes(json!({"age": 2}))), None);
        assert_eq!(tree.evaluate(&attributes(json!({"age": 0}))), Some(false));
    }
}
