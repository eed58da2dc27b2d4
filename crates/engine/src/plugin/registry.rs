use std::sync::{Arc, Mutex};

use cadence_types::Message;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::{PluginHandler, merge_config};

/// A node named a handler id that nothing registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no plugin registered for handler id '{handler_id}'")]
pub struct HandlerNotFound {
    pub handler_id: String,
}

/// Lifecycle of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Registered but its rendering code is not ready yet.
    Loading,
    /// Ready to own nodes.
    Active,
    /// Registered but switched off; nodes fall back to plain input.
    Disabled,
}

/// Outcome of looking up a handler id.
#[derive(Clone)]
pub enum PluginResolution {
    Active(Arc<dyn PluginHandler>),
    Loading,
    Disabled,
}

impl PluginResolution {
    pub fn state(&self) -> PluginState {
        match self {
            PluginResolution::Active(_) => PluginState::Active,
            PluginResolution::Loading => PluginState::Loading,
            PluginResolution::Disabled => PluginState::Disabled,
        }
    }
}

impl std::fmt::Debug for PluginResolution {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginResolution::Active(handler) => formatter.debug_tuple("Active").field(&handler.id()).finish(),
            PluginResolution::Loading => formatter.write_str("Loading"),
            PluginResolution::Disabled => formatter.write_str("Disabled"),
        }
    }
}

#[derive(Clone)]
struct PluginRegistration {
    handler: Arc<dyn PluginHandler>,
    state: PluginState,
}

/// Thread-safe mapping from handler id to implementation, populated at startup.
///
/// Registration order is preserved so listings are stable.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Mutex<IndexMap<String, PluginRegistration>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active handler, replacing any previous registration with the same id.
    pub fn register(&self, handler: Arc<dyn PluginHandler>) {
        self.register_with_state(handler, PluginState::Active);
    }

    /// Register a handler in an explicit state.
    pub fn register_with_state(&self, handler: Arc<dyn PluginHandler>, state: PluginState) {
        let handler_id = handler.id().to_string();
        info!(plugin_id = %handler_id, name = %handler.name(), ?state, "plugin registered");
        self.entries
            .lock()
            .expect("plugin registry lock")
            .insert(handler_id, PluginRegistration { handler, state });
    }

    /// Move a registered handler to another state (e.g. `Loading` → `Active`).
    pub fn set_state(&self, handler_id: &str, state: PluginState) -> Result<(), HandlerNotFound> {
        let mut entries = self.entries.lock().expect("plugin registry lock");
        let registration = entries.get_mut(handler_id).ok_or_else(|| HandlerNotFound {
            handler_id: handler_id.to_string(),
        })?;
        debug!(plugin_id = %handler_id, from = ?registration.state, to = ?state, "plugin state changed");
        registration.state = state;
        Ok(())
    }

    /// Look up a handler id.
    pub fn resolve(&self, handler_id: &str) -> Result<PluginResolution, HandlerNotFound> {
        let entries = self.entries.lock().expect("plugin registry lock");
        let registration = entries.get(handler_id).ok_or_else(|| HandlerNotFound {
            handler_id: handler_id.to_string(),
        })?;
        Ok(match registration.state {
            PluginState::Active => PluginResolution::Active(Arc::clone(&registration.handler)),
            PluginState::Loading => PluginResolution::Loading,
            PluginState::Disabled => PluginResolution::Disabled,
        })
    }

    /// Default configuration for a handler regardless of state.
    pub fn default_config(&self, handler_id: &str) -> Result<Value, HandlerNotFound> {
        let entries = self.entries.lock().expect("plugin registry lock");
        entries
            .get(handler_id)
            .map(|registration| registration.handler.default_config())
            .ok_or_else(|| HandlerNotFound {
                handler_id: handler_id.to_string(),
            })
    }

    /// Merge node attrs over the handler defaults and run its message generator.
    pub fn generate_messages(
        &self,
        handler_id: &str,
        attrs: &IndexMap<String, Value>,
        runtime_data: &Value,
    ) -> Result<Vec<Message>, HandlerNotFound> {
        let handler = self.handler(handler_id).ok_or_else(|| HandlerNotFound {
            handler_id: handler_id.to_string(),
        })?;
        let config = merge_config(&handler.default_config(), attrs);
        Ok(handler.generate_messages(&config, runtime_data))
    }

    fn handler(&self, handler_id: &str) -> Option<Arc<dyn PluginHandler>> {
        let entries = self.entries.lock().expect("plugin registry lock");
        let handler = entries.get(handler_id).map(|registration| Arc::clone(&registration.handler));
        handler
    }

    /// Registered ids with their states, in registration order.
    pub fn list(&self) -> Vec<(String, PluginState)> {
        self.entries
            .lock()
            .expect("plugin registry lock")
            .iter()
            .map(|(id, registration)| (id.clone(), registration.state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginError, RenderRequest, StaticOutputPlugin};
    use serde_json::json;

    struct LoudPlugin;

    impl PluginHandler for LoudPlugin {
        fn id(&self) -> &str {
            "loud"
        }

        fn name(&self) -> &str {
            "Loud"
        }

        fn default_config(&self) -> Value {
            json!({"suffix": "!"})
        }

        fn generate_messages(&self, config: &Value, runtime_data: &Value) -> Vec<Message> {
            let suffix = config["suffix"].as_str().unwrap_or_default();
            vec![Message::new("assistant", format!("{}{}", runtime_data["text"].as_str().unwrap_or_default(), suffix))]
        }

        fn render(&self, request: RenderRequest) -> Result<(), PluginError> {
            request.completion.complete(Value::Null);
            Ok(())
        }
    }

    #[test]
    fn unknown_ids_are_reported() {
        let registry = PluginRegistry::new();
        let error = registry.resolve("missing").expect_err("not registered");
        assert_eq!(error.handler_id, "missing");
        assert!(error.to_string().contains("'missing'"));
    }

    #[test]
    fn loading_plugins_resolve_to_loading_until_activated() {
        let registry = PluginRegistry::new();
        registry.register_with_state(Arc::new(StaticOutputPlugin), PluginState::Loading);

        assert!(matches!(registry.resolve("static"), Ok(PluginResolution::Loading)));
        registry.set_state("static", PluginState::Active).expect("registered");
        assert!(matches!(registry.resolve("static"), Ok(PluginResolution::Active(_))));
        registry.set_state("static", PluginState::Disabled).expect("registered");
        assert_eq!(registry.resolve("static").unwrap().state(), PluginState::Disabled);
        assert!(registry.set_state("nope", PluginState::Active).is_err());
    }

    #[test]
    fn generate_messages_merges_defaults_with_attrs() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(LoudPlugin));

        let mut attrs = IndexMap::new();
        let defaults = registry
            .generate_messages("loud", &attrs, &json!({"text": "hi"}))
            .expect("registered");
        assert_eq!(defaults, vec![Message::new("assistant", "hi!")]);

        attrs.insert("suffix".to_string(), json!("?"));
        let overridden = registry
            .generate_messages("loud", &attrs, &json!({"text": "hi"}))
            .expect("registered");
        assert_eq!(overridden, vec![Message::new("assistant", "hi?")]);
    }

    #[test]
    fn lists_plugins_in_registration_order() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(LoudPlugin));
        registry.register_with_state(Arc::new(StaticOutputPlugin), PluginState::Disabled);
        assert_eq!(
            registry.list(),
            vec![("loud".to_string(), PluginState::Active), ("static".to_string(), PluginState::Disabled)]
        );
    }
}
