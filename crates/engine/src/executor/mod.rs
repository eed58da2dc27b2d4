//! Execution engine facade.
//!
//! - `machine::StepMachine` drives one execution node by node
//! - `persistence::RunPersistence` is the best-effort storage seam the machine reports to
//! - [`ScenarioEngine`] owns the session: registered scenarios, the plugin registry, the
//!   context tree, the history store, and at most one running machine
//!
//! Plugin completions reach the engine over an internal control channel; callers drive
//! them in with [`ScenarioEngine::pump_plugin_completions`].

use std::path::PathBuf;
use std::sync::Arc;

use cadence_types::{Execution, ExecutionId, ExecutionStatus, Message, RunControl, RunEvent, Scenario};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use crate::context::ContextStore;
use crate::error::EngineError;
use crate::history::ExecutionHistory;
use crate::order::compute_order;
use crate::plugin::PluginRegistry;

pub mod machine;
pub mod persistence;

pub use machine::{NodePrompt, StepMachine, StepState, apply_transform};
pub use persistence::{HistoryPersistence, NullPersistence, RunPersistence};

static IDLE: StepState = StepState::Idle;

/// Session-scoped entry point for running scenarios.
pub struct ScenarioEngine {
    scenarios: IndexMap<String, Arc<Scenario>>,
    registry: Arc<PluginRegistry>,
    history: Arc<dyn ExecutionHistory>,
    persistence: Arc<dyn RunPersistence>,
    context: ContextStore,
    control_tx: UnboundedSender<RunControl>,
    control_rx: UnboundedReceiver<RunControl>,
    machine: Option<StepMachine>,
}

impl ScenarioEngine {
    pub fn new(registry: Arc<PluginRegistry>, history: Arc<dyn ExecutionHistory>) -> Self {
        let (control_tx, control_rx) = unbounded_channel();
        let persistence: Arc<dyn RunPersistence> = Arc::new(HistoryPersistence::new(Arc::clone(&history)));
        Self {
            scenarios: IndexMap::new(),
            registry,
            history,
            persistence,
            context: ContextStore::new(),
            control_tx,
            control_rx,
            machine: None,
        }
    }

    /// Also save the final context of every run to `<dir>/<scenario id>.json`.
    pub fn with_context_dir(mut self, context_dir: impl Into<PathBuf>) -> Self {
        self.persistence = Arc::new(HistoryPersistence::new(Arc::clone(&self.history)).with_context_dir(context_dir));
        self
    }

    /// Start from an existing context tree, e.g. a saved snapshot.
    pub fn with_context(mut self, context: ContextStore) -> Self {
        self.context = context;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Register (or replace) a scenario template.
    pub fn register_scenario(&mut self, scenario: Scenario) {
        debug!(scenario_id = %scenario.id, nodes = scenario.nodes.len(), "scenario registered");
        self.scenarios.insert(scenario.id.clone(), Arc::new(scenario));
    }

    pub fn scenario(&self, scenario_id: &str) -> Option<&Scenario> {
        self.scenarios.get(scenario_id).map(Arc::as_ref)
    }

    fn scenario_arc(&self, scenario_id: &str) -> Result<Arc<Scenario>, EngineError> {
        self.scenarios
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| EngineError::ScenarioNotFound(scenario_id.to_string()))
    }

    pub fn calculate_execution_order(&self, scenario_id: &str) -> Result<Vec<String>, EngineError> {
        let scenario = self.scenario_arc(scenario_id)?;
        Ok(compute_order(&scenario.nodes)?)
    }

    /// Start a run. Only one execution may be running per engine.
    pub fn start_execution(&mut self, scenario_id: &str) -> Result<ExecutionId, EngineError> {
        if let Some(active) = self.active_execution()
            && active.is_running()
        {
            return Err(EngineError::RunInProgress(active.id.clone()));
        }
        let scenario = self.scenario_arc(scenario_id)?;
        let mut machine = StepMachine::new(
            scenario,
            Arc::clone(&self.registry),
            Arc::clone(&self.persistence),
            self.control_tx.clone(),
        );
        let execution_id = machine.start(&mut self.context)?;
        self.machine = Some(machine);
        Ok(execution_id)
    }

    /// Submit input for the current node and return the recorded output.
    pub fn execute_node(&mut self, execution_id: &ExecutionId, node_id: &str, input: Value) -> Result<Value, EngineError> {
        let machine = owned_machine(&mut self.machine, execution_id)?;
        machine.submit_input(&mut self.context, node_id, input)?;
        Ok(machine
            .execution()
            .and_then(|execution| execution.results.get(node_id))
            .map(|result| result.output.clone())
            .unwrap_or(Value::Null))
    }

    pub fn skip_node(&mut self, execution_id: &ExecutionId, node_id: &str) -> Result<(), EngineError> {
        let machine = owned_machine(&mut self.machine, execution_id)?;
        machine.skip(&mut self.context, node_id)
    }

    /// Terminate an execution from outside the machine.
    ///
    /// `interrupted` cancels, `error` fails with the given message, and `completed` is only
    /// accepted once every node has been processed. Executions not driven by this engine
    /// are completed directly in the history store.
    pub fn complete_execution(
        &mut self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<Execution, EngineError> {
        let owned = self
            .active_execution()
            .is_some_and(|execution| execution.id == *execution_id);
        if !owned {
            return Ok(self.history.complete_execution(execution_id, status, error)?);
        }

        let machine = owned_machine(&mut self.machine, execution_id)?;
        match status {
            ExecutionStatus::Interrupted => machine.interrupt(&mut self.context)?,
            ExecutionStatus::Error => machine.fail(&mut self.context, error.unwrap_or_else(|| "execution aborted".to_string()))?,
            ExecutionStatus::Completed | ExecutionStatus::Running => {
                return Err(EngineError::InvalidTransition {
                    action: "mark the execution completed",
                    state: machine.state().to_string(),
                });
            }
        }
        machine
            .execution()
            .cloned()
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.clone()))
    }

    /// Apply queued plugin completions and validity updates. Returns how many were handled.
    pub fn pump_plugin_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(control) = self.control_rx.try_recv() {
            handled += 1;
            let Some(machine) = self.machine.as_mut() else {
                debug!(?control, "dropping control without an active machine");
                continue;
            };
            if let Err(error) = machine.handle_control(&mut self.context, control) {
                warn!(%error, "queued control rejected");
            }
        }
        handled
    }

    /// Sender that feeds the same queue as plugin completion handles.
    pub fn control_sender(&self) -> UnboundedSender<RunControl> {
        self.control_tx.clone()
    }

    pub fn set_validity(&mut self, node_id: &str, valid: bool) -> Result<(), EngineError> {
        let machine = self.machine.as_mut().ok_or_else(|| EngineError::InvalidTransition {
            action: "set validity",
            state: StepState::Idle.to_string(),
        })?;
        machine.set_validity(node_id, valid);
        Ok(())
    }

    pub fn is_valid(&self, node_id: &str) -> bool {
        self.machine.as_ref().is_some_and(|machine| machine.is_valid(node_id))
    }

    pub fn state(&self) -> &StepState {
        self.machine.as_ref().map(StepMachine::state).unwrap_or(&IDLE)
    }

    /// Execution driven by the current (or last) machine.
    pub fn active_execution(&self) -> Option<&Execution> {
        self.machine.as_ref().and_then(StepMachine::execution)
    }

    pub fn drain_events(&mut self) -> Vec<RunEvent> {
        self.machine.as_mut().map(StepMachine::drain_events).unwrap_or_default()
    }

    /// Messages a node's handler generates for the current context.
    pub fn preview_messages(&self, scenario_id: &str, node_id: &str) -> Result<Vec<Message>, EngineError> {
        let scenario = self.scenario_arc(scenario_id)?;
        let node = scenario
            .node(node_id)
            .ok_or_else(|| EngineError::Execution(format!("scenario '{scenario_id}' has no node '{node_id}'")))?;
        let Some(handler_id) = node.handler_id() else {
            return Ok(Vec::new());
        };
        Ok(self.registry.generate_messages(handler_id, &node.attrs, self.context.context())?)
    }

    pub fn context(&self) -> &Value {
        self.context.context()
    }

    /// Value at `path`, `null` when missing.
    pub fn get_by_path(&self, path: &str) -> Value {
        self.context.value_at(path)
    }

    pub fn update_by_path(&mut self, path: &str, value: Value) {
        self.context.update_by_path(path, value);
    }

    /// Drop the context between sessions. Refused while a run is in flight.
    pub fn reset_context(&mut self) -> Result<(), EngineError> {
        if let Some(active) = self.active_execution()
            && active.is_running()
        {
            return Err(EngineError::RunInProgress(active.id.clone()));
        }
        self.context.reset();
        Ok(())
    }

    pub fn get_latest_execution(&self, scenario_id: &str) -> Result<Option<Execution>, EngineError> {
        Ok(self.history.get_latest_execution(scenario_id)?)
    }

    pub fn get_executions_by_scenario(&self, scenario_id: &str, limit: usize) -> Result<Vec<Execution>, EngineError> {
        Ok(self.history.get_executions_by_scenario(scenario_id, limit)?)
    }

    pub fn clear_history(&self, scenario_id: &str) -> Result<usize, EngineError> {
        Ok(self.history.clear_history(scenario_id)?)
    }
}

fn owned_machine<'a>(machine: &'a mut Option<StepMachine>, execution_id: &ExecutionId) -> Result<&'a mut StepMachine, EngineError> {
    match machine.as_mut() {
        Some(machine) if machine.execution().is_some_and(|execution| execution.id == *execution_id) => Ok(machine),
        _ => Err(EngineError::ExecutionNotFound(execution_id.clone())),
    }
}
