use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Reserved attribute that overrides the user id as the bucketing input.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// Largest magnitude a numeric attribute may have and still be compared exactly.
pub(crate) const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Type alias for a HashMap representing key-value pairs of user attributes.
///
/// # Examples
/// ```
/// # use decision_core::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("beta".to_owned(), true.into()),
///     ("country".to_owned(), "us".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of a user attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, `i64`, and `bool`
/// types.
///
/// ```
/// # use decision_core::AttributeValue;
/// let string_attr: AttributeValue = "US".into();
/// let number_attr: AttributeValue = 18.5.into();
/// let int_attr: AttributeValue = 42i64.into();
/// let bool_attr: AttributeValue = true.into();
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Short name of the value type, used in reasons.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Number(_) => "number",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Null => "null",
        }
    }

    /// Convert a JSON scalar into an attribute value. Arrays and objects have no counterpart.
    pub(crate) fn from_json(value: &serde_json::Value) -> Option<AttributeValue> {
        Some(match value {
            serde_json::Value::String(s) => AttributeValue::String(s.clone()),
            serde_json::Value::Number(n) => AttributeValue::Number(n.as_f64()?),
            serde_json::Value::Bool(b) => AttributeValue::Boolean(*b),
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => return None,
        })
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// Numbers outside of `±2^53` (or non-finite) cannot be compared exactly.
pub(crate) fn is_safe_number(value: f64) -> bool {
    value.is_finite() && value.abs() <= MAX_SAFE_NUMBER
}

/// Returns the id used for bucketing: the `$opt_bucketing_id` string attribute when present,
/// otherwise the user id.
pub fn bucketing_id<'a>(user_id: &'a str, attributes: &'a Attributes) -> &'a str {
    match attributes.get(BUCKETING_ID_ATTRIBUTE) {
        Some(AttributeValue::String(id)) => id,
        Some(other) => {
            log::warn!(target: "decision_core", user_id;
                "bucketing id attribute is a {}, not a string; using user id", other.type_name());
            user_id
        }
        None => user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_untagged_values() {
        let attributes: Attributes =
            serde_json::from_str(r#"{"a": "x", "b": 1.5, "c": true, "d": null}"#).unwrap();

        assert_eq!(attributes["a"], AttributeValue::String("x".into()));
        assert_eq!(attributes["b"], AttributeValue::Number(1.5));
        assert_eq!(attributes["c"], AttributeValue::Boolean(true));
        assert_eq!(attributes["d"], AttributeValue::Null);
    }

    #[test]
    fn bucketing_id_defaults_to_user_id() {
        let attributes = Attributes::new();
        assert_eq!(bucketing_id("user", &attributes), "user");
    }

    #[test]
    fn bucketing_id_uses_override() {
        let attributes: Attributes =
            [(BUCKETING_ID_ATTRIBUTE.to_owned(), "device-1".into())].into();
        assert_eq!(bucketing_id("user", &attributes), "device-1");
    }

    #[test]
    fn bucketing_id_ignores_non_string_override() {
        let attributes: Attributes = [(BUCKETING_ID_ATTRIBUTE.to_owned(), 5.0.into())].into();
        assert_eq!(bucketing_id("user", &attributes), "user");
    }

    #[test]
    fn safe_number_range() {
        assert!(is_safe_number(0.0));
        assert!(is_safe_number(MAX_SAFE_NUMBER));
        assert!(is_safe_number(-MAX_SAFE_NUMBER));
        assert!(!is_safe_number(MAX_SAFE_NUMBER * 2.0));
        assert!(!is_safe_number(f64::INFINITY));
        assert!(!is_safe_number(f64::NAN));
    }
}
