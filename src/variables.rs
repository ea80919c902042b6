//! Typed values of flag variables.
use serde_json::{Map, Number, Value};

use crate::{
    decision::DecisionReasons,
    project::{FeatureFlag, FeatureVariable, VariableType, Variation},
};

/// Resolve every variable of `flag` for the served variation.
///
/// A feature-enabled variation's override wins over the variable's default. Values that do not
/// parse as their declared type are left out and reported as error reasons.
pub(crate) fn flag_variables(
    flag: &FeatureFlag,
    variation: Option<&Variation>,
    reasons: &mut DecisionReasons,
) -> Map<String, Value> {
    let overrides = variation.filter(|variation| variation.is_feature_enabled());

    flag.variables
        .iter()
        .filter_map(|variable| {
            let raw = overrides
                .and_then(|variation| {
                    variation
                        .variables
                        .iter()
                        .find(|usage| usage.id == variable.id)
                })
                .map_or(variable.default_value.as_str(), |usage| usage.value.as_str());

            match parse_value(variable, raw) {
                Some(value) => Some((variable.key.clone(), value)),
                None => {
                    reasons.add_error(format!(
                        "Variable value for key ({}) is invalid or wrong type.",
                        variable.key
                    ));
                    None
                }
            }
        })
        .collect()
}

fn parse_value(variable: &FeatureVariable, raw: &str) -> Option<Value> {
    let is_json_string = variable.variable_type == VariableType::String
        && variable.sub_type.as_deref() == Some("json");

    match variable.variable_type {
        _ if is_json_string => serde_json::from_str(raw).ok(),
        VariableType::String | VariableType::Unknown => Some(Value::String(raw.to_owned())),
        VariableType::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
        VariableType::Double => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        VariableType::Boolean => match raw.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        VariableType::Json => serde_json::from_str(raw).ok(),
    }
}
