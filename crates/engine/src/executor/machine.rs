//! Step state machine.
//!
//! One machine drives one execution of one scenario. It walks the resolved order with a
//! single cursor; only the node under the cursor can receive input, a plugin completion,
//! or a skip. Every observable change is queued as a [`RunEvent`] for the caller to drain.
//!
//! ```text
//! Idle -> Resolving -> AwaitingInput  -> Completed -> Resolving ... -> RunCompleted
//!                   \> AwaitingPlugin /           \> Skipped /
//! any running state -> Errored | Interrupted
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cadence_types::scenario::validation::validate_candidate_value;
use cadence_types::{
    AwaitKind, Execution, ExecutionId, ExecutionStatus, Message, Node, NodeResult, NodeTransform, RunControl, RunEvent, Scenario,
};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::persistence::RunPersistence;
use crate::context::{ContextStore, TemplateScope, interpolate_string, interpolate_value};
use crate::error::EngineError;
use crate::order::compute_order;
use crate::plugin::{CompletionHandle, PluginRegistry, PluginResolution, PluginState, RenderRequest, merge_config};

/// Prompt exposed while a node waits for user input.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePrompt {
    pub node_id: String,
    pub label: String,
    /// `assistantMessage` with templates resolved.
    pub message: Option<String>,
    /// Node attrs with templates resolved.
    pub attrs: Value,
    /// Why the node's handler could not take over, if it names one.
    pub handler_error: Option<String>,
}

impl NodePrompt {
    /// Prompt content as messages: the assistant message, then any handler error.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(message) = &self.message {
            messages.push(Message::new("assistant", message.clone()));
        }
        if let Some(error) = &self.handler_error {
            messages.push(Message::new("system", error.clone()));
        }
        messages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    Idle,
    Resolving {
        index: usize,
        node_id: String,
    },
    AwaitingInput {
        index: usize,
        prompt: NodePrompt,
    },
    AwaitingPlugin {
        index: usize,
        node_id: String,
        handler_id: String,
        messages: Vec<Message>,
    },
    Completed {
        node_id: String,
    },
    Skipped {
        node_id: String,
    },
    RunCompleted,
    Errored {
        message: String,
    },
    Interrupted,
}

impl StepState {
    /// Node under the cursor while it waits for input or a plugin.
    pub fn awaiting_node(&self) -> Option<&str> {
        match self {
            StepState::AwaitingInput { prompt, .. } => Some(&prompt.node_id),
            StepState::AwaitingPlugin { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::RunCompleted | StepState::Errored { .. } | StepState::Interrupted)
    }

    fn label(&self) -> &'static str {
        match self {
            StepState::Idle => "idle",
            StepState::Resolving { .. } => "resolving",
            StepState::AwaitingInput { .. } => "awaiting input",
            StepState::AwaitingPlugin { .. } => "awaiting plugin",
            StepState::Completed { .. } => "completed",
            StepState::Skipped { .. } => "skipped",
            StepState::RunCompleted => "run completed",
            StepState::Errored { .. } => "errored",
            StepState::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Drives a single execution of a scenario.
pub struct StepMachine {
    scenario: Arc<Scenario>,
    registry: Arc<PluginRegistry>,
    persistence: Arc<dyn RunPersistence>,
    control_tx: UnboundedSender<RunControl>,
    execution: Option<Execution>,
    order: Vec<String>,
    cursor: usize,
    state: StepState,
    validity: HashMap<String, bool>,
    events: Vec<RunEvent>,
}

impl StepMachine {
    /// `control_tx` is handed to plugins through their completion handles; whoever owns the
    /// receiving end feeds those commands back through [`StepMachine::handle_control`].
    pub fn new(
        scenario: Arc<Scenario>,
        registry: Arc<PluginRegistry>,
        persistence: Arc<dyn RunPersistence>,
        control_tx: UnboundedSender<RunControl>,
    ) -> Self {
        Self {
            scenario,
            registry,
            persistence,
            control_tx,
            execution: None,
            order: Vec::new(),
            cursor: 0,
            state: StepState::Idle,
            validity: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn execution(&self) -> Option<&Execution> {
        self.execution.as_ref()
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_running(&self) -> bool {
        self.execution.as_ref().is_some_and(Execution::is_running)
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<RunEvent> {
        std::mem::take(&mut self.events)
    }

    /// Resolve the order, open an execution and enter the first node.
    ///
    /// A resolver error leaves the machine idle and creates no execution.
    pub fn start(&mut self, context: &mut ContextStore) -> Result<ExecutionId, EngineError> {
        if !matches!(self.state, StepState::Idle) {
            return Err(self.invalid("start"));
        }
        let order = compute_order(&self.scenario.nodes)?;

        let execution = Execution::start(self.scenario.id.clone());
        let execution_id = execution.id.clone();
        info!(execution_id = %execution_id, scenario_id = %self.scenario.id, nodes = order.len(), "execution started");
        self.persistence.begin_execution(&execution);
        self.events.push(RunEvent::RunStarted {
            execution_id: execution_id.clone(),
            scenario_id: self.scenario.id.clone(),
            order: order.clone(),
            at: execution.start_time,
        });
        self.execution = Some(execution);
        self.order = order;
        self.cursor = 0;

        if self.order.is_empty() {
            self.finish(context, ExecutionStatus::Completed, None);
        } else {
            self.enter_current(context);
        }
        Ok(execution_id)
    }

    /// Submit a value for the node awaiting input.
    pub fn submit_input(&mut self, context: &mut ContextStore, node_id: &str, value: Value) -> Result<(), EngineError> {
        self.ensure_current(node_id)?;
        if !matches!(self.state, StepState::AwaitingInput { .. }) {
            return Err(self.invalid("submit input"));
        }
        let scenario = Arc::clone(&self.scenario);
        let Some(node) = scenario.node(node_id) else {
            return Err(EngineError::Execution(format!("node '{node_id}' vanished from scenario")));
        };

        if let Some(rules) = &node.validate
            && let Err(reason) = validate_candidate_value(&value, rules)
        {
            debug!(node_id, %reason, "input rejected");
            self.events.push(RunEvent::InputRejected {
                node_id: node_id.to_string(),
                reason: reason.clone(),
            });
            self.set_validity(node_id, false);
            return Err(EngineError::InputRejected {
                node_id: node_id.to_string(),
                reason,
            });
        }

        let output = match apply_transform(node.transform, &value) {
            Ok(output) => output,
            Err(reason) => {
                let message = format!("node '{node_id}': {reason}");
                self.finish(context, ExecutionStatus::Error, Some(message.clone()));
                return Err(EngineError::Execution(message));
            }
        };

        self.set_validity(node_id, true);
        self.complete_node(context, node, NodeResult::from_input(value, output));
        Ok(())
    }

    /// Apply a plugin completion. Returns false when it was ignored: the execution is no
    /// longer running, belongs to another execution, or targets a node that is not
    /// currently awaiting a plugin.
    pub fn complete_plugin(&mut self, context: &mut ContextStore, execution_id: &ExecutionId, node_id: &str, output: Value) -> bool {
        let matches_execution = self.is_current_run(execution_id);
        let awaiting = matches!(&self.state, StepState::AwaitingPlugin { node_id: current, .. } if current == node_id);
        if !matches_execution || !awaiting {
            debug!(%execution_id, node_id, state = %self.state, "ignoring plugin completion");
            return false;
        }

        let scenario = Arc::clone(&self.scenario);
        match scenario.node(node_id) {
            Some(node) => {
                self.complete_node(context, node, NodeResult::from_plugin(output));
                true
            }
            None => false,
        }
    }

    /// Skip the node under the cursor without recording a result.
    pub fn skip(&mut self, context: &mut ContextStore, node_id: &str) -> Result<(), EngineError> {
        self.ensure_current(node_id)?;
        debug!(node_id, "node skipped");
        self.state = StepState::Skipped {
            node_id: node_id.to_string(),
        };
        self.events.push(RunEvent::StepSkipped {
            node_id: node_id.to_string(),
        });
        self.advance(context);
        Ok(())
    }

    /// Abort the running execution with an error.
    pub fn fail(&mut self, context: &mut ContextStore, message: impl Into<String>) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.finish(context, ExecutionStatus::Error, Some(message.into()));
        Ok(())
    }

    /// Cancel the running execution. Plugin completions arriving later are ignored.
    pub fn interrupt(&mut self, context: &mut ContextStore) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.finish(context, ExecutionStatus::Interrupted, None);
        Ok(())
    }

    /// Record whether the node's current answer is acceptable. Reported, not enforced.
    pub fn set_validity(&mut self, node_id: &str, valid: bool) {
        if self.validity.insert(node_id.to_string(), valid) != Some(valid) {
            self.events.push(RunEvent::ValidityChanged {
                node_id: node_id.to_string(),
                valid,
            });
        }
    }

    /// Unknown nodes are reported invalid.
    pub fn is_valid(&self, node_id: &str) -> bool {
        self.validity.get(node_id).copied().unwrap_or(false)
    }

    /// Apply one control command.
    pub fn handle_control(&mut self, context: &mut ContextStore, control: RunControl) -> Result<(), EngineError> {
        match control {
            RunControl::SubmitInput { node_id, value } => self.submit_input(context, &node_id, value),
            RunControl::Skip { node_id } => self.skip(context, &node_id),
            RunControl::PluginCompleted {
                execution_id,
                node_id,
                output,
            } => {
                self.complete_plugin(context, &execution_id, &node_id, output);
                Ok(())
            }
            RunControl::SetValidity {
                execution_id,
                node_id,
                valid,
            } => {
                if self.is_current_run(&execution_id) {
                    self.set_validity(&node_id, valid);
                } else {
                    debug!(%execution_id, node_id, "ignoring validity update for another execution");
                }
                Ok(())
            }
            RunControl::Fail { message } => self.fail(context, message),
            RunControl::Cancel => self.interrupt(context),
        }
    }

    /// True while `execution_id` names this machine's execution and it is still running.
    fn is_current_run(&self, execution_id: &ExecutionId) -> bool {
        self.execution
            .as_ref()
            .is_some_and(|execution| execution.is_running() && execution.id == *execution_id)
    }

    fn enter_current(&mut self, context: &mut ContextStore) {
        let Some(node_id) = self.order.get(self.cursor).cloned() else {
            self.finish(context, ExecutionStatus::Completed, None);
            return;
        };
        let scenario = Arc::clone(&self.scenario);
        let Some(node) = scenario.node(&node_id) else {
            self.finish(context, ExecutionStatus::Error, Some(format!("node '{node_id}' is missing from the scenario")));
            return;
        };
        let index = self.cursor;
        self.state = StepState::Resolving {
            index,
            node_id: node_id.clone(),
        };

        let Some(handler_id) = node.handler_id() else {
            self.await_input(context, index, node, None);
            return;
        };

        let handler = match self.registry.resolve(handler_id) {
            Ok(PluginResolution::Active(handler)) => handler,
            Ok(resolution) => {
                let status = match resolution.state() {
                    PluginState::Loading => "still loading",
                    _ => "disabled",
                };
                let reason = format!("plugin '{handler_id}' is {status}");
                self.await_input(context, index, node, Some((handler_id, reason)));
                return;
            }
            Err(error) => {
                warn!(node_id = %node.id, %error, "falling back to input");
                self.await_input(context, index, node, Some((handler_id, error.to_string())));
                return;
            }
        };

        let Some(execution_id) = self.execution.as_ref().map(|execution| execution.id.clone()) else {
            return;
        };
        let config = {
            let results = self.execution.as_ref().map(|execution| &execution.results);
            let mut scope = TemplateScope::new(context.context());
            if let Some(results) = results {
                scope = scope.with_results(results);
            }
            interpolate_value(&merge_config(&handler.default_config(), &node.attrs), &scope)
        };
        let messages = handler.generate_messages(&config, context.context());

        self.validity.insert(node_id.clone(), false);
        self.events.push(RunEvent::StepEntered {
            index,
            node_id: node_id.clone(),
            awaiting: AwaitKind::Plugin,
            messages: messages.clone(),
        });
        self.state = StepState::AwaitingPlugin {
            index,
            node_id: node_id.clone(),
            handler_id: handler_id.to_string(),
            messages,
        };
        debug!(node_id = %node_id, plugin_id = %handler_id, "handing node to plugin");

        let request = RenderRequest {
            execution_id: execution_id.clone(),
            node_id: node_id.clone(),
            config,
            completion: CompletionHandle::new(execution_id, node_id, self.control_tx.clone()),
        };
        if let Err(error) = handler.render(request) {
            warn!(plugin_id = %handler_id, %error, "plugin render failed");
            self.finish(context, ExecutionStatus::Error, Some(error.to_string()));
        }
    }

    fn await_input(&mut self, context: &ContextStore, index: usize, node: &Node, unavailable: Option<(&str, String)>) {
        let handler_error = unavailable.map(|(handler_id, reason)| {
            self.events.push(RunEvent::HandlerUnavailable {
                node_id: node.id.clone(),
                handler_id: handler_id.to_string(),
                reason: reason.clone(),
            });
            reason
        });

        let prompt = {
            let mut scope = TemplateScope::new(context.context());
            if let Some(execution) = &self.execution {
                scope = scope.with_results(&execution.results);
            }
            let attrs = node.attrs.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
            NodePrompt {
                node_id: node.id.clone(),
                label: node.display_label().to_string(),
                message: node.assistant_message.as_deref().map(|message| interpolate_string(message, &scope)),
                attrs: interpolate_value(&Value::Object(attrs), &scope),
                handler_error,
            }
        };

        self.validity.insert(node.id.clone(), true);
        self.events.push(RunEvent::StepEntered {
            index,
            node_id: node.id.clone(),
            awaiting: AwaitKind::Input,
            messages: prompt.messages(),
        });
        self.state = StepState::AwaitingInput { index, prompt };
    }

    fn complete_node(&mut self, context: &mut ContextStore, node: &Node, result: NodeResult) {
        let Some(execution) = self.execution.as_mut() else {
            return;
        };
        execution.results.insert(node.id.clone(), result.clone());
        self.persistence.record_result(&execution.id, &node.id, &result);
        if let Some(path) = node.context_path.as_deref() {
            context.update_by_path(path, result.output.clone());
        }
        debug!(node_id = %node.id, "node completed");
        self.state = StepState::Completed { node_id: node.id.clone() };
        self.events.push(RunEvent::StepCompleted {
            node_id: node.id.clone(),
            result,
        });
        self.advance(context);
    }

    fn advance(&mut self, context: &mut ContextStore) {
        self.cursor += 1;
        if self.cursor >= self.order.len() {
            self.finish(context, ExecutionStatus::Completed, None);
        } else {
            self.enter_current(context);
        }
    }

    fn finish(&mut self, context: &mut ContextStore, status: ExecutionStatus, error: Option<String>) {
        let Some(execution) = self.execution.as_mut() else {
            return;
        };
        let finished_at = Utc::now();
        execution.status = status;
        execution.finished_at = Some(finished_at);
        execution.error = error.clone();

        self.persistence.complete_execution(&execution.id, status, error.as_deref());
        self.persistence.save_context(&self.scenario.id, context.context());
        info!(execution_id = %execution.id, %status, error = ?error, "execution finished");

        self.state = match status {
            ExecutionStatus::Completed => StepState::RunCompleted,
            ExecutionStatus::Interrupted => StepState::Interrupted,
            _ => StepState::Errored {
                message: error.clone().unwrap_or_default(),
            },
        };
        self.events.push(RunEvent::RunFinished {
            status,
            error,
            at: finished_at,
        });
    }

    fn ensure_running(&self) -> Result<&Execution, EngineError> {
        match &self.execution {
            Some(execution) if execution.is_running() => Ok(execution),
            Some(execution) => Err(EngineError::ExecutionNotRunning(execution.id.clone())),
            None => Err(self.invalid("act on an execution")),
        }
    }

    fn ensure_current(&self, node_id: &str) -> Result<(), EngineError> {
        self.ensure_running()?;
        let current = self.state.awaiting_node();
        if current != Some(node_id) {
            return Err(EngineError::NodeOutOfOrder {
                requested: node_id.to_string(),
                current: current.map(str::to_string),
            });
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }
}

/// Turn submitted input into the node output.
///
/// Text transforms leave non-string values untouched.
pub fn apply_transform(transform: Option<NodeTransform>, input: &Value) -> Result<Value, String> {
    let (Some(transform), Value::String(text)) = (transform, input) else {
        return Ok(input.clone());
    };
    match transform {
        NodeTransform::Trim => Ok(Value::String(text.trim().to_string())),
        NodeTransform::Lowercase => Ok(Value::String(text.to_lowercase())),
        NodeTransform::Uppercase => Ok(Value::String(text.to_uppercase())),
        NodeTransform::Json => serde_json::from_str(text).map_err(|error| format!("input is not valid JSON: {error}")),
    }
}
