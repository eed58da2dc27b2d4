//! Execution records: one timestamped run of a scenario.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque execution identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Error,
    Interrupted,
}

impl ExecutionStatus {
    /// Terminal statuses freeze the execution record.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Interrupted => "interrupted",
        };
        formatter.write_str(label)
    }
}

/// Recorded outcome of a single node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeResult {
    /// User-submitted value; absent when a plugin produced the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Value written back to the context.
    pub output: Value,
}

impl NodeResult {
    pub fn from_input(input: Value, output: Value) -> Self {
        Self { input: Some(input), output }
    }

    pub fn from_plugin(output: Value) -> Self {
        Self { input: None, output }
    }
}

/// One run of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub scenario_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Results keyed by node id, in completion order.
    #[serde(default)]
    pub results: IndexMap<String, NodeResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Execution {
    /// Create a running execution with no results.
    pub fn start(scenario_id: impl Into<String>) -> Self {
        Self {
            id: ExecutionId::generate(),
            scenario_id: scenario_id.into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            finished_at: None,
            results: IndexMap::new(),
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }
}
