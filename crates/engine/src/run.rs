//! Asynchronous scenario runner that streams lifecycle events and responds to
//! control commands.
//!
//! The runner owns a [`StepMachine`] for the whole run. The caller owns the event
//! receiver and steers the run through the control channel; plugin completion handles
//! feed the same channel, so every state change is applied in arrival order. Dropping the
//! event receiver counts as cancellation.

use std::sync::Arc;

use anyhow::Result;
use cadence_types::{RunControl, RunEvent, Scenario};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::context::ContextStore;
use crate::executor::{RunPersistence, StepMachine};
use crate::plugin::PluginRegistry;

/// Everything a run needs besides its channels.
pub struct ScenarioRunRequest {
    pub scenario: Arc<Scenario>,
    pub registry: Arc<PluginRegistry>,
    pub persistence: Arc<dyn RunPersistence>,
    /// Context the run reads from and writes to; handed back when the run ends.
    pub context: ContextStore,
}

/// Drives a scenario run to a terminal state while emitting lifecycle events.
///
/// `control_tx` must feed `control_rx`; it is handed to plugins so their completions
/// arrive through the same queue. Resolver failures are returned before any event is
/// emitted.
pub async fn drive_scenario_run(
    request: ScenarioRunRequest,
    control_tx: UnboundedSender<RunControl>,
    mut control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<ContextStore> {
    let ScenarioRunRequest {
        scenario,
        registry,
        persistence,
        mut context,
    } = request;

    let mut machine = StepMachine::new(scenario, registry, persistence, control_tx);
    machine.start(&mut context)?;
    forward_events(&mut machine, &event_tx);

    while machine.is_running() {
        let control = tokio::select! {
            control = control_rx.recv() => control,
            _ = event_tx.closed() => None,
        };

        let Some(control) = control else {
            debug!("run listener went away; interrupting");
            machine.interrupt(&mut context)?;
            break;
        };

        if let Err(error) = machine.handle_control(&mut context, control) {
            warn!(%error, "run control rejected");
        }
        forward_events(&mut machine, &event_tx);
    }

    forward_events(&mut machine, &event_tx);
    Ok(context)
}

fn forward_events(machine: &mut StepMachine, event_tx: &UnboundedSender<RunEvent>) {
    for event in machine.drain_events() {
        if event_tx.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::executor::{HistoryPersistence, NullPersistence};
    use crate::history::{ExecutionHistory, InMemoryExecutionHistory};
    use crate::plugin::register_builtin_plugins;
    use cadence_types::{AwaitKind, ExecutionStatus, Node};
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn node(id: &str, order: i64, handler: Option<&str>) -> Node {
        Node {
            id: id.into(),
            order: Some(order),
            template_id: handler.map(str::to_string),
            context_path: Some(id.into()),
            ..Default::default()
        }
    }

    fn request(nodes: Vec<Node>, persistence: Arc<dyn RunPersistence>) -> ScenarioRunRequest {
        let registry = Arc::new(PluginRegistry::new());
        register_builtin_plugins(&registry);
        ScenarioRunRequest {
            scenario: Arc::new(Scenario {
                id: "demo".into(),
                nodes,
                ..Default::default()
            }),
            registry,
            persistence,
            context: ContextStore::new(),
        }
    }

    fn collect(event_rx: &mut UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn queued_inputs_complete_the_run() {
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, mut event_rx) = unbounded_channel();
        for (node_id, value) in [("A", "x"), ("B", "y")] {
            control_tx
                .send(RunControl::SubmitInput {
                    node_id: node_id.into(),
                    value: json!(value),
                })
                .unwrap();
        }

        let context = drive_scenario_run(
            request(vec![node("A", 1, None), node("B", 2, None)], Arc::new(NullPersistence)),
            control_tx,
            control_rx,
            event_tx,
        )
        .await
        .expect("run");

        assert_eq!(context.value_at("B"), json!("y"));
        let events = collect(&mut event_rx);
        let entered: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                RunEvent::StepEntered {
                    node_id,
                    awaiting: AwaitKind::Input,
                    ..
                } => Some(node_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(entered, vec!["A", "B"]);
        assert!(matches!(
            events.last(),
            Some(RunEvent::RunFinished {
                status: ExecutionStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cancel_wins_over_a_later_plugin_completion() {
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, mut event_rx) = unbounded_channel();
        control_tx.send(RunControl::Cancel).unwrap();

        let mut static_node = node("P", 1, Some("static"));
        static_node.attrs.insert("value".into(), json!("late"));
        let context = drive_scenario_run(request(vec![static_node], Arc::new(NullPersistence)), control_tx, control_rx, event_tx)
            .await
            .expect("run");

        assert_eq!(context.get_by_path("P"), None);
        let events = collect(&mut event_rx);
        assert!(!events.iter().any(|event| matches!(event, RunEvent::StepCompleted { .. })));
        assert!(matches!(
            events.last(),
            Some(RunEvent::RunFinished {
                status: ExecutionStatus::Interrupted,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cycle_is_returned_before_any_event() {
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, mut event_rx) = unbounded_channel();
        let mut first = node("A", 1, None);
        first.dependencies = vec!["B".into()];
        let mut second = node("B", 2, None);
        second.dependencies = vec!["A".into()];

        let error = drive_scenario_run(request(vec![first, second], Arc::new(NullPersistence)), control_tx, control_rx, event_tx)
            .await
            .expect_err("cycle");
        assert!(matches!(error.downcast_ref::<EngineError>(), Some(EngineError::Resolve(_))));
        assert!(collect(&mut event_rx).is_empty());
    }

    #[tokio::test]
    async fn dropped_listener_interrupts_the_run() {
        let history = Arc::new(InMemoryExecutionHistory::new());
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        drop(event_rx);

        drive_scenario_run(
            request(vec![node("A", 1, None)], Arc::new(HistoryPersistence::new(history.clone()))),
            control_tx,
            control_rx,
            event_tx,
        )
        .await
        .expect("run");

        let latest = history.get_latest_execution("demo").unwrap().expect("recorded");
        assert_eq!(latest.status, ExecutionStatus::Interrupted);
    }
}
