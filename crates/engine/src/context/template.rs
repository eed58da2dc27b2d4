//! # Template Interpolation
//!
//! Node prompts, node `attrs`, and plugin message templates may embed `${{ ... }}`
//! expressions that are resolved against the live run:
//!
//! - `${{ context.path.to.field }}` - value from the scenario context
//! - `${{ nodes.<id>.output[.path] }}` - output recorded for a completed node
//! - `${{ nodes.<id>.input }}` - raw input submitted for a node
//! - `${{ data.path }}` - runtime data handed to a plugin message generator
//!
//! A string that consists of exactly one template is replaced by the raw JSON value, so
//! `attrs: { items: "${{ context.list }}" }` yields an array rather than its text.
//! Unresolvable expressions render as empty strings (or `null` in the raw case).
//!
//! ```rust
//! use cadence_engine::context::{TemplateScope, interpolate_value};
//! use serde_json::json;
//!
//! let context = json!({"user": {"name": "ada"}});
//! let scope = TemplateScope::new(&context);
//! let value = interpolate_value(&json!({"greeting": "hi ${{ context.user.name }}"}), &scope);
//! assert_eq!(value["greeting"], "hi ada");
//! ```

use cadence_types::NodeResult;
use indexmap::IndexMap;
use serde_json::Value;

use super::{navigate, path_segments};

/// Data sources available to template expressions.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub context: &'a Value,
    pub results: Option<&'a IndexMap<String, NodeResult>>,
    pub data: Option<&'a Value>,
}

impl<'a> TemplateScope<'a> {
    pub fn new(context: &'a Value) -> Self {
        Self {
            context,
            results: None,
            data: None,
        }
    }

    pub fn with_results(mut self, results: &'a IndexMap<String, NodeResult>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_data(mut self, data: &'a Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Recursively interpolate every string inside `value`.
pub fn interpolate_value(value: &Value, scope: &TemplateScope<'_>) -> Value {
    match value {
        Value::String(text) => match sole_expression(text) {
            Some(expression) => resolve_value(expression, scope).unwrap_or(Value::Null),
            None => Value::String(interpolate_string(text, scope)),
        },
        Value::Array(items) => Value::Array(items.iter().map(|item| interpolate_value(item, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| (key.clone(), interpolate_value(nested, scope)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Replace every `${{ ... }}` marker in `input` with its rendered value.
///
/// A marker without a closing `}}` is kept verbatim along with the rest of the string.
pub fn interpolate_string(input: &str, scope: &TemplateScope<'_>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(start) = remaining.find("${{") {
        let (before, after) = remaining.split_at(start);
        output.push_str(before);

        let Some(end) = after.find("}}") else {
            output.push_str(after);
            return output;
        };
        let expression = after[3..end].trim();
        if let Some(resolved) = resolve_value(expression, scope) {
            output.push_str(&render_value(&resolved));
        }
        remaining = &after[end + 2..];
    }

    output.push_str(remaining);
    output
}

fn sole_expression(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("${{")?.strip_suffix("}}")?;
    if inner.contains("${{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn resolve_value(expression: &str, scope: &TemplateScope<'_>) -> Option<Value> {
    let segments = path_segments(expression);
    let (root, rest) = segments.split_first()?;
    match *root {
        "context" => navigate(scope.context, rest).cloned(),
        "data" => navigate(scope.data?, rest).cloned(),
        "nodes" => {
            let (node_id, rest) = rest.split_first()?;
            let result = scope.results?.get(*node_id)?;
            match rest.split_first() {
                Some((&"input", path)) => navigate(result.input.as_ref()?, path).cloned(),
                Some((&"output", path)) => navigate(&result.output, path).cloned(),
                // `nodes.<id>.field` is shorthand for `nodes.<id>.output.field`
                _ => navigate(&result.output, rest).cloned(),
            }
        }
        _ => None,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interpolates_context_paths_inside_text() {
        let context = json!({"user": {"name": "ada", "age": 36}});
        let scope = TemplateScope::new(&context);
        assert_eq!(
            interpolate_string("${{ context.user.name }} is ${{ context.user.age }}", &scope),
            "ada is 36"
        );
    }

    #[test]
    fn sole_expression_keeps_raw_json() {
        let context = json!({"list": [1, 2]});
        let scope = TemplateScope::new(&context);
        assert_eq!(interpolate_value(&json!("${{ context.list }}"), &scope), json!([1, 2]));
        assert_eq!(interpolate_value(&json!("${{ context.missing }}"), &scope), Value::Null);
    }

    #[test]
    fn resolves_node_results_and_runtime_data() {
        let context = json!({});
        let mut results = IndexMap::new();
        results.insert("a".to_string(), NodeResult::from_input(json!(" x "), json!({"clean": "x"})));
        let data = json!({"topic": "rust"});
        let scope = TemplateScope::new(&context).with_results(&results).with_data(&data);

        assert_eq!(interpolate_string("${{ nodes.a.output.clean }}", &scope), "x");
        assert_eq!(interpolate_string("${{ nodes.a.clean }}", &scope), "x");
        assert_eq!(interpolate_string("[${{ nodes.a.input }}]", &scope), "[ x ]");
        assert_eq!(interpolate_string("about ${{ data.topic }}", &scope), "about rust");
    }

    #[test]
    fn unterminated_marker_is_preserved() {
        let context = json!({"a": 1});
        let scope = TemplateScope::new(&context);
        assert_eq!(interpolate_string("x ${{ context.a", &scope), "x ${{ context.a");
        assert_eq!(interpolate_string("no templates", &scope), "no templates");
    }
}
