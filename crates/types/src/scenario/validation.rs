//! Validation helpers shared across scenario consumers.
//!
//! Two concerns live here: structural checks applied when a scenario document is
//! loaded, and the value checks applied when a user submits input for a node that
//! declares `validate` rules.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{NodeInputValidation, Scenario};

static NODE_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-:]+$").expect("node id regex should compile"));

/// Check the authoring-level shape of a scenario.
///
/// Dependency structure (unknown ids, duplicates, cycles) is the resolver's job and is
/// not repeated here.
pub fn validate_scenario_shape(scenario: &Scenario) -> Result<(), String> {
    if scenario.id.trim().is_empty() {
        return Err("scenario is missing the required 'id'".to_string());
    }
    for node in &scenario.nodes {
        if !NODE_ID_REGEX.is_match(&node.id) {
            return Err(format!(
                "scenario '{}' has node id '{}' with unsupported characters",
                scenario.id, node.id
            ));
        }
    }
    Ok(())
}

/// Validate a submitted value against the declarative node rules.
///
/// - `required` rejects null and empty strings.
/// - Enumerations must include the candidate.
/// - Patterns, minimum length, and maximum length only apply to strings.
pub fn validate_candidate_value(candidate: &Value, validation: &NodeInputValidation) -> Result<(), String> {
    if validation.required && is_empty_value(candidate) {
        return Err("a value is required".to_string());
    }

    if !validation.allowed_values.is_empty() {
        let matches_allowed_value = validation
            .allowed_values
            .iter()
            .any(|allowed| json_values_match(allowed, candidate));
        if !matches_allowed_value {
            return Err("value is not in the allowed set".to_string());
        }
    }

    match candidate {
        Value::String(text) => {
            if let Some(min_length) = validation.min_length
                && text.chars().count() < min_length
            {
                return Err(format!("value must be at least {} characters", min_length));
            }

            if let Some(max_length) = validation.max_length
                && text.chars().count() > max_length
            {
                return Err(format!("value must be at most {} characters", max_length));
            }

            if let Some(pattern) = &validation.pattern {
                let regex = Regex::new(pattern).map_err(|error| format!("invalid pattern '{}': {}", pattern, error))?;
                if !regex.is_match(text) {
                    return Err(format!("value must match the pattern {}", pattern));
                }
            }
            Ok(())
        }
        _ if validation.pattern.is_some() || validation.min_length.is_some() || validation.max_length.is_some() => {
            Err("value must be text to satisfy validation rules".to_string())
        }
        _ => Ok(()),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn json_values_match(expected: &Value, candidate: &Value) -> bool {
    if expected == candidate {
        return true;
    }
    match (expected, candidate) {
        (Value::String(expected_text), other) if !other.is_string() => expected_text == &other.to_string(),
        (other, Value::String(candidate_text)) => serde_json::from_str::<Value>(candidate_text)
            .map(|parsed| other == &parsed)
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Node;

    #[test]
    fn rejects_scenario_without_id() {
        let scenario = Scenario::default();
        let error = validate_scenario_shape(&scenario).expect_err("missing id");
        assert!(error.contains("missing the required 'id'"));
    }

    #[test]
    fn rejects_node_ids_with_spaces() {
        let scenario = Scenario {
            id: "demo".into(),
            nodes: vec![Node {
                id: "bad id".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let error = validate_scenario_shape(&scenario).expect_err("bad node id");
        assert!(error.contains("bad id"), "unexpected error: {error}");
    }

    #[test]
    fn required_rejects_blank_text() {
        let validation = NodeInputValidation {
            required: true,
            ..Default::default()
        };
        assert!(validate_candidate_value(&Value::String("   ".into()), &validation).is_err());
        assert!(validate_candidate_value(&Value::String("ok".into()), &validation).is_ok());
    }

    #[test]
    fn pattern_and_lengths_apply_to_text() {
        let validation = NodeInputValidation {
            pattern: Some("^[a-z]+$".into()),
            min_length: Some(2),
            max_length: Some(4),
            ..Default::default()
        };
        assert!(validate_candidate_value(&Value::String("abc".into()), &validation).is_ok());
        assert!(validate_candidate_value(&Value::String("a".into()), &validation).is_err());
        assert!(validate_candidate_value(&Value::String("abcde".into()), &validation).is_err());
        assert!(validate_candidate_value(&Value::String("AB".into()), &validation).is_err());
        assert!(validate_candidate_value(&serde_json::json!(12), &validation).is_err());
    }

    #[test]
    fn enumerations_accept_stringified_numbers() {
        let validation = NodeInputValidation {
            allowed_values: vec![serde_json::json!(42)],
            ..Default::default()
        };
        assert!(validate_candidate_value(&serde_json::json!(42), &validation).is_ok());
        assert!(validate_candidate_value(&Value::String("42".into()), &validation).is_ok());
        assert!(validate_candidate_value(&serde_json::json!(7), &validation).is_err());
    }
}
