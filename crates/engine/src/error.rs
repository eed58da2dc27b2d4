use cadence_types::ExecutionId;
use thiserror::Error;

use crate::history::PersistenceError;
use crate::order::ResolveError;
use crate::plugin::HandlerNotFound;

/// Errors surfaced by the step machine and the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    HandlerNotFound(#[from] HandlerNotFound),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Processing a node failed; the execution is marked `error`.
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("scenario '{0}' is not registered")]
    ScenarioNotFound(String),
    #[error("execution '{0}' not found")]
    ExecutionNotFound(ExecutionId),
    #[error("execution '{0}' is not running")]
    ExecutionNotRunning(ExecutionId),
    #[error("node '{requested}' is not the current node (current: {})", current.as_deref().unwrap_or("none"))]
    NodeOutOfOrder { requested: String, current: Option<String> },
    #[error("cannot {action} while the machine is {state}")]
    InvalidTransition { action: &'static str, state: String },
    /// Submitted value failed the node's `validate` rules; the node keeps waiting.
    #[error("input for node '{node_id}' rejected: {reason}")]
    InputRejected { node_id: String, reason: String },
    #[error("execution '{0}' is still running; finish or interrupt it first")]
    RunInProgress(ExecutionId),
    /// A history query failed. Writes made during a run never surface here.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
