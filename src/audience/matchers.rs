use std::{cmp::Ordering, str::FromStr};

use crate::{
    attributes::{is_safe_number, AttributeValue, Attributes},
    audience::{
        semantic_version::{compare_versions, InvalidVersion},
        AttributeCondition,
    },
};

/// Only condition type understood by this engine.
const CUSTOM_ATTRIBUTE_TYPE: &str = "custom_attribute";

/// Error produced while evaluating a condition leaf. The leaf then resolves to unknown.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConditionError {
    /// Condition `type` is missing or not `custom_attribute`.
    #[error("audience condition {condition} uses an unknown condition type. You may need to upgrade to a newer release of the SDK")]
    InvalidConditionType { condition: String },

    /// Condition `match` is not a known match type.
    #[error("audience condition {condition} uses an unknown match type. You may need to upgrade to a newer release of the SDK")]
    InvalidMatchType { condition: String },

    /// Condition has no attribute name.
    #[error("audience condition {condition} has no attribute name")]
    InvalidConditionName { condition: String },

    /// Condition value is missing or has a type unsupported by its match type.
    #[error("audience condition {condition} has an unsupported condition value. You may need to upgrade to a newer release of the SDK")]
    InvalidConditionValue { condition: String },

    /// User attribute referenced by the condition is absent.
    #[error("audience condition {condition} evaluated to UNKNOWN because no value was passed for user attribute {name:?}")]
    MissingAttributeValue { condition: String, name: String },

    /// User attribute referenced by the condition is null.
    #[error("audience condition {condition} evaluated to UNKNOWN because a null value was passed for user attribute {name:?}")]
    NilAttributeValue { condition: String, name: String },

    /// User attribute has a type that the match type cannot compare.
    #[error("audience condition {condition} evaluated to UNKNOWN because a value of type {value_type} was passed for user attribute {name:?}")]
    InvalidAttributeType {
        condition: String,
        name: String,
        value_type: &'static str,
    },

    /// Numeric user attribute is outside of `±2^53`.
    #[error("audience condition {condition} evaluated to UNKNOWN because the number value for user attribute {name:?} is not in the range [-2^53, +2^53]")]
    AttributeValueOutOfRange { condition: String, name: String },

    /// User attribute or condition value is not a valid semantic version.
    #[error("audience condition {condition} evaluated to UNKNOWN because user attribute {name:?} is not a valid semantic version")]
    InvalidSemanticVersion { condition: String, name: String },

    /// Condition tree node has an unexpected shape.
    #[error("condition has an invalid format: {0}")]
    InvalidConditionShape(String),

    /// Audience id leaf references an audience the configuration does not define.
    #[error("audience {0} is not in the configuration")]
    AudienceNotFound(String),
}

/// Attribute match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// The attribute is present and not null.
    Exists,
    /// The attribute is compared with the condition value.
    Compare(Comparison),
}

/// How an attribute is compared with the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Exact,
    Substring,
    Number(Comparator),
    Semver(Comparator),
}

/// Required ordering of the attribute relative to the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    /// Whether `ordering` of the attribute relative to the condition value satisfies `self`.
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Eq => ordering.is_eq(),
            Comparator::Gt => ordering.is_gt(),
            Comparator::Ge => ordering.is_ge(),
            Comparator::Lt => ordering.is_lt(),
            Comparator::Le => ordering.is_le(),
        }
    }
}

impl FromStr for MatchType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let comparison = match s {
            "exists" => return Ok(MatchType::Exists),
            "exact" => Comparison::Exact,
            "substring" => Comparison::Substring,
            "gt" => Comparison::Number(Comparator::Gt),
            "ge" => Comparison::Number(Comparator::Ge),
            "lt" => Comparison::Number(Comparator::Lt),
            "le" => Comparison::Number(Comparator::Le),
            "semver_eq" => Comparison::Semver(Comparator::Eq),
            "semver_gt" => Comparison::Semver(Comparator::Gt),
            "semver_ge" => Comparison::Semver(Comparator::Ge),
            "semver_lt" => Comparison::Semver(Comparator::Lt),
            "semver_le" => Comparison::Semver(Comparator::Le),
            _ => return Err(()),
        };
        Ok(MatchType::Compare(comparison))
    }
}

impl AttributeCondition {
    /// Evaluate the condition against user attributes.
    ///
    /// Returns `Err` when the condition cannot be evaluated. Callers treat that as unknown.
    pub fn evaluate(&self, attributes: &Attributes) -> Result<bool, ConditionError> {
        let condition = || self.to_string();

        if self.condition_type.as_deref() != Some(CUSTOM_ATTRIBUTE_TYPE) {
            return Err(ConditionError::InvalidConditionType {
                condition: condition(),
            });
        }

        let match_type = match self.match_type.as_deref() {
            None => MatchType::Compare(Comparison::Exact),
            Some(s) => s.parse().map_err(|()| ConditionError::InvalidMatchType {
                condition: condition(),
            })?,
        };

        let Some(name) = self.name.as_deref() else {
            return Err(ConditionError::InvalidConditionName {
                condition: condition(),
            });
        };

        let attribute = attributes.get(name);

        let comparison = match match_type {
            MatchType::Exists => return Ok(attribute.is_some_and(|value| !value.is_null())),
            MatchType::Compare(comparison) => comparison,
        };

        let Some(attribute) = attribute else {
            return Err(ConditionError::MissingAttributeValue {
                condition: condition(),
                name: name.to_owned(),
            });
        };

        let expected = self
            .value
            .as_ref()
            .and_then(AttributeValue::from_json)
            .filter(|value| !value.is_null())
            .ok_or_else(|| ConditionError::InvalidConditionValue {
                condition: condition(),
            })?;

        if attribute.is_null() {
            return Err(ConditionError::NilAttributeValue {
                condition: condition(),
                name: name.to_owned(),
            });
        }

        let invalid_condition_value = || ConditionError::InvalidConditionValue {
            condition: condition(),
        };
        let invalid_attribute_type = || ConditionError::InvalidAttributeType {
            condition: condition(),
            name: name.to_owned(),
            value_type: attribute.type_name(),
        };
        let safe_number = |value: f64| {
            if is_safe_number(value) {
                Ok(value)
            } else {
                Err(ConditionError::AttributeValueOutOfRange {
                    condition: condition(),
                    name: name.to_owned(),
                })
            }
        };

        match comparison {
            Comparison::Exact => match (&expected, attribute) {
                (AttributeValue::String(expected), AttributeValue::String(actual)) => {
                    Ok(expected == actual)
                }
                (AttributeValue::Boolean(expected), AttributeValue::Boolean(actual)) => {
                    Ok(expected == actual)
                }
                (AttributeValue::Number(expected), AttributeValue::Number(actual)) => {
                    if !is_safe_number(*expected) {
                        return Err(invalid_condition_value());
                    }
                    Ok(*expected == safe_number(*actual)?)
                }
                (AttributeValue::Number(expected), _) if !is_safe_number(*expected) => {
                    Err(invalid_condition_value())
                }
                _ => Err(invalid_attribute_type()),
            },
            Comparison::Substring => {
                let expected = expected.as_str().ok_or_else(invalid_condition_value)?;
                let actual = attribute.as_str().ok_or_else(invalid_attribute_type)?;
                Ok(actual.contains(expected))
            }
            Comparison::Number(comparator) => {
                let expected = expected
                    .as_number()
                    .filter(|n| is_safe_number(*n))
                    .ok_or_else(invalid_condition_value)?;
                let actual = safe_number(attribute.as_number().ok_or_else(invalid_attribute_type)?)?;
                Ok(actual
                    .partial_cmp(&expected)
                    .is_some_and(|ordering| comparator.holds(ordering)))
            }
            Comparison::Semver(comparator) => {
                let target = expected.as_str().ok_or_else(invalid_condition_value)?;
                let version = attribute.as_str().ok_or_else(invalid_attribute_type)?;
                let ordering = compare_versions(version, target).map_err(|InvalidVersion| {
                    ConditionError::InvalidSemanticVersion {
                        condition: condition(),
                        name: name.to_owned(),
                    }
                })?;
                Ok(comparator.holds(ordering))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn condition(name: &str, match_type: &str, value: serde_json::Value) -> AttributeCondition {
        AttributeCondition {
            name: Some(name.to_owned()),
            condition_type: Some(CUSTOM_ATTRIBUTE_TYPE.to_owned()),
            match_type: Some(match_type.to_owned()),
            value: Some(value),
        }
    }

    fn attrs(name: &str, value: impl Into<AttributeValue>) -> Attributes {
        [(name.to_owned(), value.into())].into()
    }

    #[test]
    fn exact_string() {
        let c = condition("country", "exact", json!("us"));
        assert_eq!(c.evaluate(&attrs("country", "us")), Ok(true));
        assert_eq!(c.evaluate(&attrs("country", "ca")), Ok(false));
    }

    #[test]
    fn exact_number_and_bool() {
        assert_eq!(
            condition("n", "exact", json!(3)).evaluate(&attrs("n", 3.0)),
            Ok(true)
        );
        assert_eq!(
            condition("n", "exact", json!(3.5)).evaluate(&attrs("n", 3.0)),
            Ok(false)
        );
        assert_eq!(
            condition("b", "exact", json!(false)).evaluate(&attrs("b", false)),
            Ok(true)
        );
    }

    #[test]
    fn missing_match_defaults_to_exact() {
        let mut c = condition("country", "exact", json!("us"));
        c.match_type = None;
        assert_eq!(c.evaluate(&attrs("country", "us")), Ok(true));
    }

    #[test]
    fn exact_type_mismatch() {
        let c = condition("country", "exact", json!("us"));
        assert!(matches!(
            c.evaluate(&attrs("country", 5.0)),
            Err(ConditionError::InvalidAttributeType { value_type: "number", .. })
        ));
    }

    #[test]
    fn parses_match_types() {
        assert_eq!("exists".parse(), Ok(MatchType::Exists));
        assert_eq!("exact".parse(), Ok(MatchType::Compare(Comparison::Exact)));
        assert_eq!(
            "ge".parse(),
            Ok(MatchType::Compare(Comparison::Number(Comparator::Ge)))
        );
        assert_eq!(
            "semver_eq".parse(),
            Ok(MatchType::Compare(Comparison::Semver(Comparator::Eq)))
        );
        assert_eq!("regex".parse::<MatchType>(), Err(()));
    }

    #[test]
    fn exists() {
        let c = condition("a", "exists", json!(null));
        assert_eq!(c.evaluate(&attrs("a", "x")), Ok(true));
        assert_eq!(c.evaluate(&attrs("a", AttributeValue::Null)), Ok(false));
        assert_eq!(c.evaluate(&Attributes::new()), Ok(false));
    }

    #[test]
    fn substring() {
        let c = condition("email", "substring", json!("@example"));
        assert_eq!(c.evaluate(&attrs("email", "me@example.com")), Ok(true));
        assert_eq!(c.evaluate(&attrs("email", "me@test.com")), Ok(false));
        assert!(matches!(
            c.evaluate(&attrs("email", true)),
            Err(ConditionError::InvalidAttributeType { .. })
        ));
        assert!(matches!(
            condition("email", "substring", json!(5)).evaluate(&attrs("email", "5")),
            Err(ConditionError::InvalidConditionValue { .. })
        ));
    }

    #[test]
    fn numeric_comparisons() {
        let age = attrs("age", 30.0);
        assert_eq!(condition("age", "gt", json!(18)).evaluate(&age), Ok(true));
        assert_eq!(condition("age", "gt", json!(30)).evaluate(&age), Ok(false));
        assert_eq!(condition("age", "ge", json!(30)).evaluate(&age), Ok(true));
        assert_eq!(condition("age", "lt", json!(30)).evaluate(&age), Ok(false));
        assert_eq!(condition("age", "le", json!(30)).evaluate(&age), Ok(true));
        assert_eq!(condition("age", "lt", json!(40.5)).evaluate(&age), Ok(true));
    }

    #[test]
    fn numeric_out_of_range() {
        let c = condition("n", "gt", json!(1));
        assert!(matches!(
            c.evaluate(&attrs("n", 2f64.powi(53) + 2.0)),
            Err(ConditionError::AttributeValueOutOfRange { .. })
        ));
        assert!(matches!(
            c.evaluate(&attrs("n", f64::INFINITY)),
            Err(ConditionError::AttributeValueOutOfRange { .. })
        ));
        assert!(matches!(
            condition("n", "exact", json!(1)).evaluate(&attrs("n", -(2f64.powi(53)) - 2.0)),
            Err(ConditionError::AttributeValueOutOfRange { .. })
        ));
        assert!(matches!(
            condition("n", "gt", json!(1e300)).evaluate(&attrs("n", 1.0)),
            Err(ConditionError::InvalidConditionValue { .. })
        ));
    }

    #[test]
    fn numeric_with_string_attribute() {
        assert!(matches!(
            condition("n", "gt", json!(1)).evaluate(&attrs("n", "2")),
            Err(ConditionError::InvalidAttributeType { value_type: "string", .. })
        ));
    }

    #[test]
    fn semver_matches() {
        let version = attrs("app_version", "2.1.3");
        assert_eq!(
            condition("app_version", "semver_eq", json!("2.1")).evaluate(&version),
            Ok(true)
        );
        assert_eq!(
            condition("app_version", "semver_gt", json!("2.1.2")).evaluate(&version),
            Ok(true)
        );
        assert_eq!(
            condition("app_version", "semver_ge", json!("2.1.3")).evaluate(&version),
            Ok(true)
        );
        assert_eq!(
            condition("app_version", "semver_lt", json!("2.1.3-beta")).evaluate(&version),
            Ok(false)
        );
        assert_eq!(
            condition("app_version", "semver_le", json!("3")).evaluate(&version),
            Ok(true)
        );
    }

    #[test]
    fn semver_invalid_version() {
        assert!(matches!(
            condition("v", "semver_eq", json!("2.1")).evaluate(&attrs("v", "2.1.3.4")),
            Err(ConditionError::InvalidSemanticVersion { .. })
        ));
        assert!(matches!(
            condition("v", "semver_eq", json!("2.1")).evaluate(&attrs("v", 2.1)),
            Err(ConditionError::InvalidAttributeType { .. })
        ));
    }

    #[test]
    fn missing_and_null_attributes() {
        let c = condition("age", "gt", json!(1));
        assert!(matches!(
            c.evaluate(&Attributes::new()),
            Err(ConditionError::MissingAttributeValue { .. })
        ));
        assert!(matches!(
            c.evaluate(&attrs("age", AttributeValue::Null)),
            Err(ConditionError::NilAttributeValue { .. })
        ));
    }

    #[test]
    fn invalid_condition_fields() {
        let mut c = condition("age", "gt", json!(1));
        c.condition_type = Some("third_party_dimension".into());
        assert!(matches!(
            c.evaluate(&attrs("age", 2.0)),
            Err(ConditionError::InvalidConditionType { .. })
        ));

        let c = condition("age", "regex", json!(1));
        assert!(matches!(
            c.evaluate(&attrs("age", 2.0)),
            Err(ConditionError::InvalidMatchType { .. })
        ));

        let mut c = condition("age", "gt", json!(1));
        c.name = None;
        assert!(matches!(
            c.evaluate(&attrs("age", 2.0)),
            Err(ConditionError::InvalidConditionName { .. })
        ));

        let mut c = condition("age", "gt", json!(1));
        c.value = None;
        assert!(matches!(
            c.evaluate(&attrs("age", 2.0)),
            Err(ConditionError::InvalidConditionValue { .. })
        ));

        assert!(matches!(
            condition("age", "exact", json!({"nested": true})).evaluate(&attrs("age", 2.0)),
            Err(ConditionError::InvalidConditionValue { .. })
        ));
    }
}
