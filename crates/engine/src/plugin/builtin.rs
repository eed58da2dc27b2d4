use std::sync::Arc;

use cadence_types::Message;
use serde_json::{Value, json};
use tracing::debug;

use super::{PluginError, PluginHandler, PluginRegistry, RenderRequest};
use crate::context::{TemplateScope, interpolate_string};

/// Completes immediately with `config.value`.
///
/// `config.message` is a template rendered against the runtime data handed to
/// [`PluginHandler::generate_messages`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticOutputPlugin;

impl PluginHandler for StaticOutputPlugin {
    fn id(&self) -> &str {
        "static"
    }

    fn name(&self) -> &str {
        "Static output"
    }

    fn default_config(&self) -> Value {
        json!({"value": null, "message": ""})
    }

    fn generate_messages(&self, config: &Value, runtime_data: &Value) -> Vec<Message> {
        let Some(template) = config.get("message").and_then(Value::as_str) else {
            return Vec::new();
        };
        if template.is_empty() {
            return Vec::new();
        }
        let empty = Value::Null;
        let scope = TemplateScope::new(&empty).with_data(runtime_data);
        vec![Message::new("assistant", interpolate_string(template, &scope))]
    }

    fn render(&self, request: RenderRequest) -> Result<(), PluginError> {
        let output = request.config.get("value").cloned().unwrap_or(Value::Null);
        debug!(node_id = %request.node_id, "static plugin completing");
        request.completion.set_valid(true);
        request.completion.complete(output);
        Ok(())
    }
}

/// Completes with the full merged configuration; handy for wiring checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoPlugin;

impl PluginHandler for EchoPlugin {
    fn id(&self) -> &str {
        "echo"
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn generate_messages(&self, config: &Value, _runtime_data: &Value) -> Vec<Message> {
        vec![Message::new("assistant", config.to_string())]
    }

    fn render(&self, request: RenderRequest) -> Result<(), PluginError> {
        if !request.config.is_object() {
            return Err(PluginError::InvalidConfig(format!(
                "echo expects an object configuration for node '{}'",
                request.node_id
            )));
        }
        request.completion.set_valid(true);
        request.completion.complete(request.config);
        Ok(())
    }
}

/// Register every built-in handler as active.
pub fn register_builtin_plugins(registry: &PluginRegistry) {
    registry.register(Arc::new(StaticOutputPlugin));
    registry.register(Arc::new(EchoPlugin));
}
