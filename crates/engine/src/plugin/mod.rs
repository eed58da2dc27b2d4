//! Plugin handler contract and registry.
//!
//! Modules:
//! - `registry`: id → handler mapping with an explicit registration state
//! - `builtin`: small handlers shipped with the engine (`static`, `echo`)
//!
//! A handler owns a node while the step machine sits in `AwaitingPlugin`. It receives the
//! merged configuration plus a [`CompletionHandle`]; the handle is consumed by
//! [`CompletionHandle::complete`], so a handler cannot report two outputs for one node.

mod builtin;
mod registry;

pub use builtin::{EchoPlugin, StaticOutputPlugin, register_builtin_plugins};
pub use registry::{HandlerNotFound, PluginRegistry, PluginResolution, PluginState};

use cadence_types::{ExecutionId, Message, RunControl};
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Errors a handler may report while taking over a node.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{plugin_id}' could not render node '{node_id}': {message}")]
    Render {
        plugin_id: String,
        node_id: String,
        message: String,
    },
    #[error("invalid plugin configuration: {0}")]
    InvalidConfig(String),
}

/// Everything a handler needs to take over a node.
#[derive(Debug)]
pub struct RenderRequest {
    pub execution_id: ExecutionId,
    pub node_id: String,
    /// Plugin defaults merged with node attrs, already interpolated.
    pub config: Value,
    pub completion: CompletionHandle,
}

/// Registered handler implementation.
pub trait PluginHandler: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Configuration used when a node leaves a key unset.
    fn default_config(&self) -> Value {
        Value::Object(JsonMap::new())
    }

    /// Project static configuration plus live data into a message sequence. Must be pure.
    fn generate_messages(&self, config: &Value, runtime_data: &Value) -> Vec<Message>;

    /// Take over a node. Implementations eventually call `request.completion.complete`.
    fn render(&self, request: RenderRequest) -> Result<(), PluginError>;
}

/// One-shot completion callback handed to a plugin.
///
/// Completion and validity updates travel over the run's control channel, so they are
/// applied in order with every other command and are ignored once the run has ended.
/// The handle cannot be cloned, so each node gets exactly one completion:
///
/// ```compile_fail
/// fn assert_clone<T: Clone>() {}
/// assert_clone::<cadence_engine::plugin::CompletionHandle>();
/// ```
#[derive(Debug)]
pub struct CompletionHandle {
    execution_id: ExecutionId,
    node_id: String,
    sender: UnboundedSender<RunControl>,
}

impl CompletionHandle {
    pub fn new(execution_id: ExecutionId, node_id: impl Into<String>, sender: UnboundedSender<RunControl>) -> Self {
        Self {
            execution_id,
            node_id: node_id.into(),
            sender,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Report the node output. Returns false when the run no longer listens.
    pub fn complete(self, output: Value) -> bool {
        let delivered = self
            .sender
            .send(RunControl::PluginCompleted {
                execution_id: self.execution_id,
                node_id: self.node_id.clone(),
                output,
            })
            .is_ok();
        if !delivered {
            debug!(node_id = %self.node_id, "plugin completion dropped; run is gone");
        }
        delivered
    }

    /// Report whether the node's current answer is acceptable.
    pub fn set_valid(&self, valid: bool) {
        let _ = self.sender.send(RunControl::SetValidity {
            execution_id: self.execution_id.clone(),
            node_id: self.node_id.clone(),
            valid,
        });
    }
}

/// Shallow-merge node attrs over plugin defaults; node keys win.
pub fn merge_config(defaults: &Value, attrs: &IndexMap<String, Value>) -> Value {
    let mut merged = match defaults {
        Value::Object(map) => map.clone(),
        Value::Null => JsonMap::new(),
        other => {
            let mut map = JsonMap::new();
            map.insert("default".to_string(), other.clone());
            map
        }
    };
    for (key, value) in attrs {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}
