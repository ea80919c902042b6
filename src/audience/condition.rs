//! Audience condition tree model.
//!
//! Conditions arrive as nested JSON arrays where the first element may name a logical operator:
//!
//! ```json
//! ["and", ["or", "audience-1", "audience-2"], {"name": "age", "type": "custom_attribute", "match": "gt", "value": 18}]
//! ```
//!
//! A list without an operator is an implicit `or`. String items are audience id references and
//! objects are attribute conditions. Anything else is kept as an invalid node so one malformed
//! condition never fails the whole configuration.
use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One node of an audience condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    /// All operands must be true.
    And(Vec<ConditionNode>),
    /// At least one operand must be true.
    Or(Vec<ConditionNode>),
    /// Negates the first operand. Remaining operands are ignored.
    Not(Vec<ConditionNode>),
    /// Reference to an audience defined in the project configuration.
    AudienceId(String),
    /// Test of a single user attribute.
    Attribute(AttributeCondition),
    /// A node that could not be interpreted. Always evaluates to unknown.
    Invalid(serde_json::Value),
}

/// Leaf condition testing one user attribute.
///
/// Fields are kept loosely typed so that conditions produced by newer servers (unknown match
/// types, unexpected value types) still parse and resolve to unknown at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Leaf of a condition tree handed to the leaf evaluator.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Leaf<'a> {
    AudienceId(&'a str),
    Attribute(&'a AttributeCondition),
    Invalid(&'a serde_json::Value),
}

impl ConditionNode {
    /// Build a condition tree from its JSON representation.
    pub fn from_json(value: &serde_json::Value) -> ConditionNode {
        match value {
            serde_json::Value::String(audience_id) => ConditionNode::AudienceId(audience_id.clone()),
            serde_json::Value::Object(_) => {
                match serde_json::from_value::<AttributeCondition>(value.clone()) {
                    Ok(condition) => ConditionNode::Attribute(condition),
                    Err(_) => ConditionNode::Invalid(value.clone()),
                }
            }
            serde_json::Value::Array(items) => {
                let (operator, operands) = match items.first() {
                    Some(serde_json::Value::String(op)) if is_operator(op) => {
                        (op.as_str(), &items[1..])
                    }
                    _ => ("or", &items[..]),
                };
                let operands = operands.iter().map(ConditionNode::from_json).collect();
                match operator {
                    "and" => ConditionNode::And(operands),
                    "not" => ConditionNode::Not(operands),
                    _ => ConditionNode::Or(operands),
                }
            }
            _ => ConditionNode::Invalid(value.clone()),
        }
    }

    /// Convert back into the nested-array JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        fn branch(op: &str, operands: &[ConditionNode]) -> serde_json::Value {
            let mut items = Vec::with_capacity(operands.len() + 1);
            items.push(serde_json::Value::String(op.to_owned()));
            items.extend(operands.iter().map(ConditionNode::to_json));
            serde_json::Value::Array(items)
        }

        match self {
            ConditionNode::And(operands) => branch("and", operands),
            ConditionNode::Or(operands) => branch("or", operands),
            ConditionNode::Not(operands) => branch("not", operands),
            ConditionNode::AudienceId(id) => serde_json::Value::String(id.clone()),
            ConditionNode::Attribute(condition) => {
                serde_json::to_value(condition).unwrap_or(serde_json::Value::Null)
            }
            ConditionNode::Invalid(value) => value.clone(),
        }
    }

    /// An implicit `or` over a list of audience ids.
    pub fn any_of_audiences(audience_ids: &[String]) -> ConditionNode {
        ConditionNode::Or(
            audience_ids
                .iter()
                .map(|id| ConditionNode::AudienceId(id.clone()))
                .collect(),
        )
    }

    /// Evaluate the tree with three-valued logic, delegating leaves to `leaf`.
    ///
    /// `None` stands for unknown. `and` is false if any operand is false, else unknown if any
    /// operand is unknown. `or` is the dual. `not` flips true and false and keeps unknown. An empty
    /// operand list is true.
    pub(crate) fn evaluate_with<F>(&self, leaf: &mut F) -> Option<bool>
    where
        F: FnMut(Leaf<'_>) -> Option<bool>,
    {
        match self {
            ConditionNode::And(operands) => {
                let mut saw_unknown = false;
                for operand in operands {
                    match operand.evaluate_with(leaf) {
                        Some(false) => return Some(false),
                        None => saw_unknown = true,
                        Some(true) => {}
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(true)
                }
            }
            ConditionNode::Or(operands) => {
                if operands.is_empty() {
                    return Some(true);
                }
                let mut saw_unknown = false;
                for operand in operands {
                    match operand.evaluate_with(leaf) {
                        Some(true) => return Some(true),
                        None => saw_unknown = true,
                        Some(false) => {}
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(false)
                }
            }
            ConditionNode::Not(operands) => match operands.first() {
                Some(operand) => operand.evaluate_with(leaf).map(|result| !result),
                None => Some(true),
            },
            ConditionNode::AudienceId(id) => leaf(Leaf::AudienceId(id)),
            ConditionNode::Attribute(condition) => leaf(Leaf::Attribute(condition)),
            ConditionNode::Invalid(value) => leaf(Leaf::Invalid(value)),
        }
    }
}

fn is_operator(s: &str) -> bool {
    matches!(s, "and" | "or" | "not")
}

impl Display for ConditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Display for AttributeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

impl Serialize for ConditionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(ConditionNode::from_json(&value))
    }
}

/// Deserialize audience conditions that may be either a JSON tree or a JSON-encoded string
/// holding the tree.
pub(crate) fn deserialize_embedded_conditions<'de, D>(
    deserializer: D,
) -> Result<ConditionNode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(encoded) => match serde_json::from_str(&encoded) {
            Ok(decoded) => ConditionNode::from_json(&decoded),
            Err(_) => ConditionNode::Invalid(serde_json::Value::String(encoded)),
        },
        other => ConditionNode::from_json(&other),
    })
}
