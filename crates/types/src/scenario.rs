//! Strongly typed scenario schema definitions shared across the engine and CLI.
//!
//! Scenarios are authored as templates (YAML or JSON) and are read-only at runtime.
//! Node order inside a scenario is preserved exactly as authored because declaration
//! index is the final tie-breaker when the engine computes an execution order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

/// Reserved node type that always maps to plain user input rather than a plugin.
pub const INPUT_NODE_TYPE: &str = "input";

/// Declarative collection of nodes authored as a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Canonical scenario identifier used for history lookups.
    #[serde(default)]
    pub id: String,
    /// Human-readable name shown in pickers.
    #[serde(default)]
    pub name: String,
    /// Optional owning workspace.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Nodes in authoring order.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Scenario {
    /// Looks up a node by identifier.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }
}

/// One declarative unit of work inside a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Identifier unique within the owning scenario.
    pub id: String,
    /// Node type; doubles as the handler id when `template_id` is absent.
    #[serde(default, rename = "type")]
    pub r#type: Option<String>,
    /// Explicit handler/template identifier.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Dot path in the context tree receiving the node output.
    #[serde(default)]
    pub context_path: Option<String>,
    /// Handler-specific configuration, merged over the plugin defaults.
    #[serde(default)]
    pub attrs: IndexMap<String, JsonValue>,
    /// Ids of nodes that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Ordering key; also breaks ties between ready nodes.
    #[serde(default)]
    pub order: Option<i64>,
    /// Short label for timelines.
    #[serde(default)]
    pub label: Option<String>,
    /// Static prompt content; may contain `${{ ... }}` templates.
    #[serde(default)]
    pub assistant_message: Option<String>,
    /// Transform applied to submitted input before it becomes the output.
    #[serde(default)]
    pub transform: Option<NodeTransform>,
    /// Rules a submitted value must satisfy.
    #[serde(default)]
    pub validate: Option<NodeInputValidation>,
}

impl Node {
    /// Identifier of the handler this node asks for, if any.
    ///
    /// `template_id` wins over `type`; the reserved `input` type never names a handler.
    pub fn handler_id(&self) -> Option<&str> {
        if let Some(template_id) = self.template_id.as_deref()
            && !template_id.trim().is_empty()
        {
            return Some(template_id);
        }
        self.r#type
            .as_deref()
            .filter(|node_type| !node_type.trim().is_empty() && *node_type != INPUT_NODE_TYPE)
    }

    /// Label used in prompts and logs, falling back to the identifier.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Output transforms applied to user-submitted input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeTransform {
    /// Trim surrounding whitespace from string input.
    Trim,
    /// Lowercase string input.
    Lowercase,
    /// Uppercase string input.
    Uppercase,
    /// Parse string input as JSON.
    Json,
}

/// Declarative validation settings attached to an input node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeInputValidation {
    /// Whether an empty value is rejected.
    #[serde(default)]
    pub required: bool,
    /// Enumerated set of allowed values, if constrained.
    #[serde(rename = "enum")]
    #[serde(default)]
    pub allowed_values: Vec<JsonValue>,
    /// Regular expression pattern the value must match, when provided.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Minimum length for string inputs, when specified.
    #[serde(default)]
    pub min_length: Option<usize>,
    /// Maximum length for string inputs, when specified.
    #[serde(default)]
    pub max_length: Option<usize>,
}

/// Scenario file contents keyed by scenario id.
#[derive(Debug, Clone, Default)]
pub struct ScenarioBundle {
    pub scenarios: IndexMap<String, Scenario>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_scenario() {
        let yaml_text = r#"
id: onboarding
name: Onboarding
nodes:
  - id: greet
    type: input
    assistantMessage: "What is your name?"
    contextPath: user.name
    order: 1
  - id: review
    templateId: checklist
    dependencies: [greet]
    attrs:
      items: 3
"#;

        let scenario: Scenario = serde_yaml::from_str(yaml_text).expect("deserialize scenario");

        assert_eq!(scenario.id, "onboarding");
        assert_eq!(scenario.nodes.len(), 2);
        assert_eq!(scenario.nodes[0].context_path.as_deref(), Some("user.name"));
        assert_eq!(scenario.nodes[0].order, Some(1));
        assert_eq!(scenario.nodes[1].dependencies, vec!["greet".to_string()]);
    }

    #[test]
    fn handler_id_prefers_template_and_ignores_input_type() {
        let mut node = Node {
            id: "n".into(),
            r#type: Some(INPUT_NODE_TYPE.into()),
            ..Default::default()
        };
        assert_eq!(node.handler_id(), None);

        node.r#type = Some("chart".into());
        assert_eq!(node.handler_id(), Some("chart"));

        node.template_id = Some("survey".into());
        assert_eq!(node.handler_id(), Some("survey"));
    }
}
