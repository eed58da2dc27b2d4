//! Best-effort persistence seam between the step machine and storage.
//!
//! The machine never waits on or rolls back because of storage: every failure is logged
//! and the in-memory run keeps going.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use cadence_types::{Execution, ExecutionId, ExecutionStatus, NodeResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::history::ExecutionHistory;

/// Where a run reports its progress.
pub trait RunPersistence: Send + Sync {
    fn begin_execution(&self, execution: &Execution);

    fn record_result(&self, execution_id: &ExecutionId, node_id: &str, result: &NodeResult);

    fn complete_execution(&self, execution_id: &ExecutionId, status: ExecutionStatus, error: Option<&str>);

    /// Store the context tree reached by a scenario.
    fn save_context(&self, scenario_id: &str, context: &Value);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersistence;

impl RunPersistence for NullPersistence {
    fn begin_execution(&self, _execution: &Execution) {}

    fn record_result(&self, _execution_id: &ExecutionId, _node_id: &str, _result: &NodeResult) {}

    fn complete_execution(&self, _execution_id: &ExecutionId, _status: ExecutionStatus, _error: Option<&str>) {}

    fn save_context(&self, _scenario_id: &str, _context: &Value) {}
}

/// Writes executions to an [`ExecutionHistory`] and, optionally, context snapshots to
/// `<dir>/<scenario id>.json`.
#[derive(Clone)]
pub struct HistoryPersistence {
    history: Arc<dyn ExecutionHistory>,
    context_dir: Option<PathBuf>,
}

impl HistoryPersistence {
    pub fn new(history: Arc<dyn ExecutionHistory>) -> Self {
        Self {
            history,
            context_dir: None,
        }
    }

    pub fn with_context_dir(mut self, context_dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(context_dir.into());
        self
    }

    pub fn history(&self) -> &Arc<dyn ExecutionHistory> {
        &self.history
    }
}

impl RunPersistence for HistoryPersistence {
    fn begin_execution(&self, execution: &Execution) {
        if let Err(error) = self.history.insert_execution(execution.clone()) {
            warn!(execution_id = %execution.id, %error, "failed to persist execution start");
        }
    }

    fn record_result(&self, execution_id: &ExecutionId, node_id: &str, result: &NodeResult) {
        if let Err(error) = self.history.record_result(execution_id, node_id, result.clone()) {
            warn!(%execution_id, node_id, %error, "failed to persist node result");
        }
    }

    fn complete_execution(&self, execution_id: &ExecutionId, status: ExecutionStatus, error: Option<&str>) {
        if let Err(persist_error) = self
            .history
            .complete_execution(execution_id, status, error.map(str::to_string))
        {
            warn!(%execution_id, %status, error = %persist_error, "failed to persist execution completion");
        }
    }

    fn save_context(&self, scenario_id: &str, context: &Value) {
        let Some(dir) = &self.context_dir else {
            return;
        };
        let path = dir.join(format!("{scenario_id}.json"));
        let result = fs::create_dir_all(dir)
            .and_then(|_| serde_json::to_string_pretty(context).map_err(std::io::Error::other))
            .and_then(|content| fs::write(&path, content));
        match result {
            Ok(()) => debug!(scenario_id, path = %path.display(), "context snapshot saved"),
            Err(error) => warn!(scenario_id, path = %path.display(), %error, "failed to save context snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryExecutionHistory;
    use serde_json::json;

    #[test]
    fn failures_are_swallowed() {
        let history: Arc<dyn ExecutionHistory> = Arc::new(InMemoryExecutionHistory::new());
        let persistence = HistoryPersistence::new(Arc::clone(&history));

        // Unknown execution: the store errors, persistence only logs.
        persistence.record_result(&ExecutionId::from("ghost"), "a", &NodeResult::from_plugin(json!(1)));
        persistence.complete_execution(&ExecutionId::from("ghost"), ExecutionStatus::Completed, None);
        assert!(history.get_execution(&ExecutionId::from("ghost")).unwrap().is_none());
    }

    #[test]
    fn writes_context_snapshots_per_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let persistence =
            HistoryPersistence::new(Arc::new(InMemoryExecutionHistory::new())).with_context_dir(dir.path().join("contexts"));
        persistence.save_context("demo", &json!({"name": "ada"}));

        let written = fs::read_to_string(dir.path().join("contexts").join("demo.json")).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&written).unwrap(), json!({"name": "ada"}));
    }
}
