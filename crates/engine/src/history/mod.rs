//! Execution history persistence.
//!
//! Executions are grouped per scenario, newest first. Only a `running` execution accepts
//! results or a status change; once it reaches a terminal status the record is frozen.
//! Each scenario keeps at most `max_per_scenario` executions and the oldest are dropped
//! when a new one is inserted past the cap.

use std::collections::VecDeque;
use std::sync::Mutex;

use cadence_types::{Execution, ExecutionId, ExecutionStatus, NodeResult};
use cadence_util::settings::DEFAULT_EXECUTIONS_PER_SCENARIO;
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

mod json;

pub use json::JsonExecutionHistory;

/// Errors surfaced by history store operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O failure while reading or writing the history file.
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("execution '{0}' not found")]
    ExecutionNotFound(ExecutionId),
    /// The execution already reached a terminal status.
    #[error("execution '{id}' is {status} and can no longer change")]
    ExecutionFrozen { id: ExecutionId, status: ExecutionStatus },
    #[error("cannot complete an execution with status '{0}'")]
    InvalidStatus(ExecutionStatus),
}

/// Shared trait implemented by execution history backends.
pub trait ExecutionHistory: Send + Sync {
    /// Create and store a fresh `running` execution for the scenario.
    fn start_execution(&self, scenario_id: &str) -> Result<Execution, PersistenceError> {
        let execution = Execution::start(scenario_id);
        self.insert_execution(execution.clone())?;
        Ok(execution)
    }

    /// Store an execution created elsewhere, replacing a running record with the same id.
    /// Terminal records are frozen: re-inserting one fails with `ExecutionFrozen`.
    fn insert_execution(&self, execution: Execution) -> Result<(), PersistenceError>;

    /// Attach a node result to a running execution.
    fn record_result(&self, execution_id: &ExecutionId, node_id: &str, result: NodeResult) -> Result<(), PersistenceError>;

    /// Move a running execution to a terminal status, returning the frozen record.
    fn complete_execution(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<Execution, PersistenceError>;

    fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, PersistenceError>;

    /// Most recently started execution of the scenario.
    fn get_latest_execution(&self, scenario_id: &str) -> Result<Option<Execution>, PersistenceError>;

    /// Up to `limit` executions of the scenario, newest first.
    fn get_executions_by_scenario(&self, scenario_id: &str, limit: usize) -> Result<Vec<Execution>, PersistenceError>;

    /// Remove every execution of one scenario, returning how many were dropped.
    fn clear_history(&self, scenario_id: &str) -> Result<usize, PersistenceError>;
}

/// Executions grouped by scenario id, each group newest first.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ExecutionBook {
    scenarios: IndexMap<String, VecDeque<Execution>>,
}

impl ExecutionBook {
    /// Store `execution` newest-first. A running record with the same id is replaced; a
    /// terminal one is frozen and rejects the insert.
    pub(crate) fn insert(&mut self, execution: Execution, max_per_scenario: usize) -> Result<(), PersistenceError> {
        if let Some(existing) = self.find(&execution.id)
            && existing.status.is_terminal()
        {
            return Err(PersistenceError::ExecutionFrozen {
                id: execution.id.clone(),
                status: existing.status,
            });
        }
        for executions in self.scenarios.values_mut() {
            executions.retain(|existing| existing.id != execution.id);
        }

        let executions = self.scenarios.entry(execution.scenario_id.clone()).or_default();
        executions.push_front(execution);
        while executions.len() > max_per_scenario.max(1) {
            if let Some(dropped) = executions.pop_back() {
                debug!(execution_id = %dropped.id, scenario_id = %dropped.scenario_id, "history retention dropped execution");
            }
        }
        Ok(())
    }

    fn find(&self, execution_id: &ExecutionId) -> Option<&Execution> {
        self.scenarios
            .values()
            .flat_map(|executions| executions.iter())
            .find(|execution| execution.id == *execution_id)
    }

    fn running_mut(&mut self, execution_id: &ExecutionId) -> Result<&mut Execution, PersistenceError> {
        let execution = self
            .scenarios
            .values_mut()
            .flat_map(|executions| executions.iter_mut())
            .find(|execution| execution.id == *execution_id)
            .ok_or_else(|| PersistenceError::ExecutionNotFound(execution_id.clone()))?;
        if execution.status.is_terminal() {
            return Err(PersistenceError::ExecutionFrozen {
                id: execution_id.clone(),
                status: execution.status,
            });
        }
        Ok(execution)
    }

    pub(crate) fn record_result(&mut self, execution_id: &ExecutionId, node_id: &str, result: NodeResult) -> Result<(), PersistenceError> {
        let execution = self.running_mut(execution_id)?;
        execution.results.insert(node_id.to_string(), result);
        Ok(())
    }

    pub(crate) fn complete(
        &mut self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<Execution, PersistenceError> {
        if !status.is_terminal() {
            return Err(PersistenceError::InvalidStatus(status));
        }
        let execution = self.running_mut(execution_id)?;
        execution.status = status;
        execution.finished_at = Some(Utc::now());
        execution.error = error;
        Ok(execution.clone())
    }

    pub(crate) fn get(&self, execution_id: &ExecutionId) -> Option<Execution> {
        self.find(execution_id).cloned()
    }

    pub(crate) fn latest(&self, scenario_id: &str) -> Option<Execution> {
        self.scenarios
            .get(scenario_id)
            .and_then(|executions| executions.front())
            .cloned()
    }

    pub(crate) fn by_scenario(&self, scenario_id: &str, limit: usize) -> Vec<Execution> {
        self.scenarios
            .get(scenario_id)
            .map(|executions| executions.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self, scenario_id: &str) -> usize {
        self.scenarios
            .shift_remove(scenario_id)
            .map(|executions| executions.len())
            .unwrap_or_default()
    }
}

/// In-memory history, used by tests and by runs that opt out of persistence.
#[derive(Debug)]
pub struct InMemoryExecutionHistory {
    book: Mutex<ExecutionBook>,
    max_per_scenario: usize,
}

impl Default for InMemoryExecutionHistory {
    fn default() -> Self {
        Self::with_retention(DEFAULT_EXECUTIONS_PER_SCENARIO)
    }
}

impl InMemoryExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(max_per_scenario: usize) -> Self {
        Self {
            book: Mutex::new(ExecutionBook::default()),
            max_per_scenario,
        }
    }
}

impl ExecutionHistory for InMemoryExecutionHistory {
    fn insert_execution(&self, execution: Execution) -> Result<(), PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        book.insert(execution, self.max_per_scenario)
    }

    fn record_result(&self, execution_id: &ExecutionId, node_id: &str, result: NodeResult) -> Result<(), PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        book.record_result(execution_id, node_id, result)
    }

    fn complete_execution(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<Execution, PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        book.complete(execution_id, status, error)
    }

    fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, PersistenceError> {
        let book = self.book.lock().expect("history lock poisoned");
        Ok(book.get(execution_id))
    }

    fn get_latest_execution(&self, scenario_id: &str) -> Result<Option<Execution>, PersistenceError> {
        let book = self.book.lock().expect("history lock poisoned");
        Ok(book.latest(scenario_id))
    }

    fn get_executions_by_scenario(&self, scenario_id: &str, limit: usize) -> Result<Vec<Execution>, PersistenceError> {
        let book = self.book.lock().expect("history lock poisoned");
        Ok(book.by_scenario(scenario_id, limit))
    }

    fn clear_history(&self, scenario_id: &str) -> Result<usize, PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        Ok(book.clear(scenario_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finished(history: &InMemoryExecutionHistory, scenario_id: &str) -> Execution {
        let execution = history.start_execution(scenario_id).unwrap();
        history
            .complete_execution(&execution.id, ExecutionStatus::Completed, None)
            .unwrap()
    }

    #[test]
    fn results_are_recorded_while_running() {
        let history = InMemoryExecutionHistory::new();
        let execution = history.start_execution("demo").unwrap();
        history
            .record_result(&execution.id, "a", NodeResult::from_input(json!("x"), json!("x")))
            .unwrap();

        let stored = history.get_execution(&execution.id).unwrap().expect("stored");
        assert!(stored.is_running());
        assert_eq!(stored.results["a"].output, json!("x"));
    }

    #[test]
    fn terminal_executions_are_frozen() {
        let history = InMemoryExecutionHistory::new();
        let execution = finished(&history, "demo");
        assert!(execution.finished_at.is_some());

        let error = history
            .record_result(&execution.id, "a", NodeResult::from_plugin(json!(1)))
            .expect_err("frozen");
        assert!(matches!(error, PersistenceError::ExecutionFrozen { status: ExecutionStatus::Completed, .. }));

        let error = history
            .complete_execution(&execution.id, ExecutionStatus::Error, Some("late".into()))
            .expect_err("frozen");
        assert!(matches!(error, PersistenceError::ExecutionFrozen { .. }));
        assert_eq!(history.get_execution(&execution.id).unwrap().unwrap().status, ExecutionStatus::Completed);
    }

    #[test]
    fn terminal_executions_cannot_be_reinserted() {
        let history = InMemoryExecutionHistory::new();
        let execution = history.start_execution("demo").unwrap();
        history
            .record_result(&execution.id, "a", NodeResult::from_plugin(json!(1)))
            .unwrap();
        let frozen = history
            .complete_execution(&execution.id, ExecutionStatus::Completed, None)
            .unwrap();

        let mut revived = frozen.clone();
        revived.status = ExecutionStatus::Running;
        revived.results.clear();
        let error = history.insert_execution(revived).expect_err("frozen");
        assert!(matches!(error, PersistenceError::ExecutionFrozen { status: ExecutionStatus::Completed, .. }));

        let stored = history.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.results.len(), 1);
        assert!(
            history
                .record_result(&execution.id, "b", NodeResult::from_plugin(json!(2)))
                .is_err()
        );
    }

    #[test]
    fn running_executions_can_be_replaced() {
        let history = InMemoryExecutionHistory::new();
        let execution = history.start_execution("demo").unwrap();
        let mut replacement = execution.clone();
        replacement
            .results
            .insert("a".into(), NodeResult::from_plugin(json!("seeded")));
        history.insert_execution(replacement).unwrap();

        assert_eq!(history.get_executions_by_scenario("demo", 10).unwrap().len(), 1);
        assert_eq!(history.get_execution(&execution.id).unwrap().unwrap().results.len(), 1);
    }

    #[test]
    fn completing_as_running_is_rejected() {
        let history = InMemoryExecutionHistory::new();
        let execution = history.start_execution("demo").unwrap();
        assert!(matches!(
            history.complete_execution(&execution.id, ExecutionStatus::Running, None),
            Err(PersistenceError::InvalidStatus(ExecutionStatus::Running))
        ));
        assert!(matches!(
            history.complete_execution(&ExecutionId::from("ghost"), ExecutionStatus::Completed, None),
            Err(PersistenceError::ExecutionNotFound(_))
        ));
    }

    #[test]
    fn lists_newest_first_up_to_limit() {
        let history = InMemoryExecutionHistory::new();
        let ids: Vec<ExecutionId> = (0..10).map(|_| finished(&history, "demo").id).collect();

        let listed: Vec<ExecutionId> = history
            .get_executions_by_scenario("demo", 5)
            .unwrap()
            .into_iter()
            .map(|execution| execution.id)
            .collect();
        let expected: Vec<ExecutionId> = ids.iter().rev().take(5).cloned().collect();
        assert_eq!(listed, expected);
        assert_eq!(history.get_latest_execution("demo").unwrap().unwrap().id, ids[9]);
    }

    #[test]
    fn retention_cap_drops_oldest() {
        let history = InMemoryExecutionHistory::with_retention(3);
        let ids: Vec<ExecutionId> = (0..5).map(|_| finished(&history, "demo").id).collect();

        let kept = history.get_executions_by_scenario("demo", 10).unwrap();
        assert_eq!(kept.len(), 3);
        assert!(history.get_execution(&ids[0]).unwrap().is_none());
        assert!(history.get_execution(&ids[4]).unwrap().is_some());
    }

    #[test]
    fn clearing_one_scenario_keeps_others() {
        let history = InMemoryExecutionHistory::new();
        finished(&history, "first");
        finished(&history, "first");
        let other = finished(&history, "second");

        assert_eq!(history.clear_history("first").unwrap(), 2);
        assert!(history.get_latest_execution("first").unwrap().is_none());
        assert!(history.get_executions_by_scenario("first", 10).unwrap().is_empty());
        assert_eq!(history.get_latest_execution("second").unwrap().unwrap().id, other.id);
        assert_eq!(history.clear_history("missing").unwrap(), 0);
    }
}
