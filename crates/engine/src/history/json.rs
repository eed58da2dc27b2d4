use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cadence_types::{Execution, ExecutionId, ExecutionStatus, NodeResult};
use cadence_util::EngineSettings;
use tracing::{debug, warn};

use super::{ExecutionBook, ExecutionHistory, PersistenceError};

/// JSON-backed execution history persisted on disk.
///
/// The whole book is rewritten after every mutation.
#[derive(Debug)]
pub struct JsonExecutionHistory {
    path: PathBuf,
    book: Mutex<ExecutionBook>,
    max_per_scenario: usize,
}

impl JsonExecutionHistory {
    /// Open (or lazily create) the history file at `path`.
    pub fn new(path: impl Into<PathBuf>, max_per_scenario: usize) -> Result<Self, PersistenceError> {
        let path = path.into();
        let book = load_book(&path)?;
        Ok(Self {
            path,
            book: Mutex::new(book),
            max_per_scenario,
        })
    }

    /// Open the store configured by `settings`.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, PersistenceError> {
        Self::new(settings.history_path(), settings.history.max_per_scenario)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, book: &ExecutionBook) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(book)?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), "execution history saved");
        Ok(())
    }
}

impl ExecutionHistory for JsonExecutionHistory {
    fn insert_execution(&self, execution: Execution) -> Result<(), PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        book.insert(execution, self.max_per_scenario)?;
        self.save_locked(&book)
    }

    fn record_result(&self, execution_id: &ExecutionId, node_id: &str, result: NodeResult) -> Result<(), PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        book.record_result(execution_id, node_id, result)?;
        self.save_locked(&book)
    }

    fn complete_execution(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<Execution, PersistenceError> {
        let mut book = self.book.lock().expect("history lock poisoned");
        let execution = book.complete(execution_id, status, error)?;
        self.save_locked(&book)?;
        Ok(execution)
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
        let removed = book.clear(scenario_id);
        self.save_locked(&book)?;
        Ok(removed)
    }
}

fn load_book(path: &Path) -> Result<ExecutionBook, PersistenceError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ExecutionBook>(&content) {
            Ok(book) => Ok(book),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to parse execution history; starting empty");
                Ok(ExecutionBook::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(ExecutionBook::default()),
        Err(error) => Err(PersistenceError::Io(error)),
    }
}
