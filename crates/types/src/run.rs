//! Run lifecycle events and control commands exchanged with the engine.
//!
//! The engine emits [`RunEvent`]s while a scenario executes. Callers steer a run by
//! sending [`RunControl`] commands; plugin completion handles use the same channel so
//! that every state change reaches the machine through one ordered queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::{ExecutionId, ExecutionStatus, NodeResult};

/// Role/content pair produced by a plugin's message generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// How the engine is waiting on the current node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AwaitKind {
    Input,
    Plugin,
}

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        execution_id: ExecutionId,
        scenario_id: String,
        order: Vec<String>,
        at: DateTime<Utc>,
    },
    StepEntered {
        index: usize,
        node_id: String,
        awaiting: AwaitKind,
        /// Prompt content for input nodes or generated messages for plugin nodes.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        messages: Vec<Message>,
    },
    HandlerUnavailable {
        node_id: String,
        handler_id: String,
        reason: String,
    },
    InputRejected {
        node_id: String,
        reason: String,
    },
    ValidityChanged {
        node_id: String,
        valid: bool,
    },
    StepCompleted {
        node_id: String,
        result: NodeResult,
    },
    StepSkipped {
        node_id: String,
    },
    RunFinished {
        status: ExecutionStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

/// Commands that steer a running scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum RunControl {
    /// Value for the node currently awaiting input.
    SubmitInput { node_id: String, value: Value },
    /// Skip the node currently awaiting input or a plugin.
    Skip { node_id: String },
    /// Plugin completion callback.
    PluginCompleted {
        execution_id: ExecutionId,
        node_id: String,
        output: Value,
    },
    /// Validity flag reported by a handler or the caller for one execution.
    SetValidity {
        execution_id: ExecutionId,
        node_id: String,
        valid: bool,
    },
    /// Abort the run with an error.
    Fail { message: String },
    /// User cancellation.
    Cancel,
}
