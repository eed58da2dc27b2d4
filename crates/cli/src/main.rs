use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_engine::{
    ContextStore, ExecutionHistory, HistoryPersistence, JsonExecutionHistory, PluginRegistry, ScenarioRunRequest, compute_order, drive_scenario_run,
    parse_scenario_file, register_builtin_plugins,
};
use cadence_types::{AwaitKind, Message, RunControl, RunEvent, Scenario, ScenarioBundle};
use cadence_util::EngineSettings;
use cadence_util::settings::default_settings_path;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};
use tracing_subscriber::fmt::MakeWriter;

/// Typed at an input prompt to skip the node.
const SKIP_COMMAND: &str = "/skip";

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load_settings(&default_settings_path(), io::stderr)?;
    init_tracing(&settings);
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("order", sub)) => run_order_cmd(sub),
        Some(("run", sub)) => run_scenario_cmd(&settings, sub).await,
        Some(("history", sub)) => run_history_cmd(&settings, sub),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

/// Loads settings under a temporary subscriber so problems with the settings file are
/// reported before the configured filter exists.
fn load_settings<W>(path: &Path, make_writer: W) -> Result<EngineSettings>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into());
    let bootstrap = tracing_subscriber::fmt().with_env_filter(filter).with_writer(make_writer).finish();
    tracing::subscriber::with_default(bootstrap, || EngineSettings::load_from(path))
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn init_tracing(settings: &EngineSettings) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_filter.clone());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

fn build_cli() -> Command {
    let file_arg = Arg::new("file")
        .long("file")
        .short('f')
        .action(ArgAction::Set)
        .required(true)
        .help("Path to scenario YAML/JSON");
    let scenario_arg = Arg::new("scenario")
        .long("scenario")
        .short('s')
        .action(ArgAction::Set)
        .help("Scenario id within the file (defaults to the first)");

    Command::new("cadence")
        .about("Run declarative scenarios one step at a time")
        .subcommand(
            Command::new("order")
                .about("Print the execution order of a scenario")
                .arg(file_arg.clone())
                .arg(scenario_arg.clone()),
        )
        .subcommand(
            Command::new("run")
                .about("Run a scenario interactively")
                .arg(file_arg)
                .arg(scenario_arg)
                .arg(
                    Arg::new("input")
                        .long("input")
                        .short('i')
                        .action(ArgAction::Append)
                        .value_name("NODE=VALUE")
                        .help("Answer an input node up front; VALUE is parsed as JSON when possible"),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Inspect recorded executions")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list")
                        .about("List executions of a scenario, newest first")
                        .arg(Arg::new("scenario").required(true).action(ArgAction::Set))
                        .arg(
                            Arg::new("limit")
                                .long("limit")
                                .short('n')
                                .action(ArgAction::Set)
                                .value_parser(clap::value_parser!(usize))
                                .default_value("10"),
                        )
                        .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print raw JSON records")),
                )
                .subcommand(
                    Command::new("clear")
                        .about("Delete every execution of a scenario")
                        .arg(Arg::new("scenario").required(true).action(ArgAction::Set)),
                ),
        )
}

fn load_scenario(matches: &ArgMatches) -> Result<Scenario> {
    let file = matches.get_one::<String>("file").context("missing --file")?;
    let bundle = parse_scenario_file(file)?;
    select_scenario(bundle, matches.get_one::<String>("scenario").map(String::as_str))
}

fn select_scenario(mut bundle: ScenarioBundle, requested: Option<&str>) -> Result<Scenario> {
    match requested {
        Some(id) => bundle
            .scenarios
            .shift_remove(id)
            .with_context(|| format!("scenario '{id}' not found in file")),
        None => bundle
            .scenarios
            .shift_remove_index(0)
            .map(|(_, scenario)| scenario)
            .context("file contains no scenarios"),
    }
}

fn run_order_cmd(matches: &ArgMatches) -> Result<()> {
    let scenario = load_scenario(matches)?;
    let order = compute_order(&scenario.nodes).with_context(|| format!("cannot order scenario '{}'", scenario.id))?;
    for (index, node_id) in order.iter().enumerate() {
        let label = scenario.node(node_id).and_then(|node| node.label.as_deref()).unwrap_or_default();
        println!("{:>3}. {node_id} {label}", index + 1);
    }
    Ok(())
}

/// Parses `node=value` pairs; values that are not valid JSON are taken as strings.
fn parse_presets(matches: &ArgMatches) -> Result<IndexMap<String, Value>> {
    let mut presets = IndexMap::new();
    for raw in matches.get_many::<String>("input").into_iter().flatten() {
        let (node_id, value) = raw
            .split_once('=')
            .with_context(|| format!("invalid --input '{raw}'; expected NODE=VALUE"))?;
        presets.insert(node_id.trim().to_string(), parse_input_value(value));
    }
    Ok(presets)
}

fn parse_input_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run_scenario_cmd(settings: &EngineSettings, matches: &ArgMatches) -> Result<()> {
    let scenario = load_scenario(matches)?;
    let mut presets = parse_presets(matches)?;

    let history = JsonExecutionHistory::from_settings(settings).context("failed to open execution history")?;
    let mut persistence = HistoryPersistence::new(Arc::new(history));
    if let Some(context_dir) = settings.context_dir() {
        persistence = persistence.with_context_dir(context_dir);
    }
    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry);

    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, mut event_rx) = unbounded_channel();
    let request = ScenarioRunRequest {
        scenario: Arc::new(scenario),
        registry,
        persistence: Arc::new(persistence),
        context: ContextStore::new(),
    };
    let driver = tokio::spawn(drive_scenario_run(request, control_tx.clone(), control_rx, event_tx));

    let cancel_tx = control_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(RunControl::Cancel);
        }
    });

    let mut line_rx = spawn_stdin_reader();
    let mut awaiting: Option<String> = None;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                awaiting = handle_event(event, &mut presets, &control_tx, awaiting);
            }
            line = line_rx.recv(), if awaiting.is_some() => {
                let Some(node_id) = awaiting.take() else { continue };
                let control = match line {
                    None => RunControl::Cancel,
                    Some(line) if line.trim() == SKIP_COMMAND => RunControl::Skip { node_id },
                    Some(line) => RunControl::SubmitInput { node_id, value: parse_input_value(line.trim()) },
                };
                if control_tx.send(control).is_err() {
                    warn!("run ended before input was delivered");
                }
            }
        }
    }

    let context = driver.await.context("scenario run task failed")??;
    println!("{}", serde_json::to_string_pretty(context.context())?);
    Ok(())
}

/// Prints one run event and returns the node now waiting on a typed answer, if any.
fn handle_event(
    event: RunEvent,
    presets: &mut IndexMap<String, Value>,
    control_tx: &UnboundedSender<RunControl>,
    awaiting: Option<String>,
) -> Option<String> {
    match event {
        RunEvent::RunStarted {
            execution_id,
            scenario_id,
            order,
            ..
        } => {
            println!("Running '{scenario_id}' ({execution_id})");
            println!("Order: {}", order.join(" -> "));
            awaiting
        }
        RunEvent::StepEntered {
            node_id,
            awaiting: kind,
            messages,
            ..
        } => {
            print_messages(&messages);
            if kind != AwaitKind::Input {
                return None;
            }
            if let Some(value) = presets.shift_remove(&node_id) {
                debug!(node_id, "submitting preset input");
                let _ = control_tx.send(RunControl::SubmitInput { node_id, value });
                return None;
            }
            prompt(&node_id);
            Some(node_id)
        }
        RunEvent::HandlerUnavailable { node_id, reason, .. } => {
            eprintln!("! {node_id}: {reason}");
            awaiting
        }
        RunEvent::InputRejected { node_id, reason } => {
            eprintln!("! {node_id}: {reason}");
            prompt(&node_id);
            Some(node_id)
        }
        RunEvent::ValidityChanged { node_id, valid } => {
            debug!(node_id, valid, "validity changed");
            awaiting
        }
        RunEvent::StepCompleted { node_id, result } => {
            println!("+ {node_id} = {}", result.output);
            None
        }
        RunEvent::StepSkipped { node_id } => {
            println!("- {node_id} skipped");
            None
        }
        RunEvent::RunFinished { status, error, .. } => {
            match error {
                Some(error) => println!("Run {status}: {error}"),
                None => println!("Run {status}"),
            }
            None
        }
    }
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        println!("[{}] {}", message.role, message.content);
    }
}

fn prompt(node_id: &str) {
    print!("{node_id}> ");
    let _ = io::stdout().flush();
}

/// Reads stdin on a dedicated thread; the channel closes on EOF.
fn spawn_stdin_reader() -> UnboundedReceiver<String> {
    let (line_tx, line_rx) = unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    line_rx
}

fn run_history_cmd(settings: &EngineSettings, matches: &ArgMatches) -> Result<()> {
    let history = JsonExecutionHistory::from_settings(settings).context("failed to open execution history")?;
    match matches.subcommand() {
        Some(("list", sub)) => {
            let scenario_id = sub.get_one::<String>("scenario").context("missing scenario id")?;
            let limit = sub.get_one::<usize>("limit").copied().unwrap_or(10);
            let executions = history.get_executions_by_scenario(scenario_id, limit)?;
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&executions)?);
                return Ok(());
            }
            if executions.is_empty() {
                println!("No executions recorded for '{scenario_id}'");
            }
            for execution in executions {
                let error = execution.error.as_deref().map(|error| format!("  {error}")).unwrap_or_default();
                println!(
                    "{}  {:<11}  {}  {} result(s){error}",
                    execution.id,
                    execution.status.to_string(),
                    execution.start_time.format("%Y-%m-%d %H:%M:%S"),
                    execution.results.len()
                );
            }
        }
        Some(("clear", sub)) => {
            let scenario_id = sub.get_one::<String>("scenario").context("missing scenario id")?;
            let removed = history.clear_history(scenario_id)?;
            println!("Removed {removed} execution(s) for '{scenario_id}'");
        }
        _ => println!("Available subcommands: list, clear"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_json_and_fall_back_to_strings() {
        let matches = build_cli()
            .try_get_matches_from(["cadence", "run", "-f", "demo.yaml", "-i", "age=42", "-i", "name=ada", "--input", "tags=[\"a\"]"])
            .unwrap();
        let (_, run) = matches.subcommand().unwrap();
        let presets = parse_presets(run).unwrap();
        assert_eq!(presets["age"], serde_json::json!(42));
        assert_eq!(presets["name"], serde_json::json!("ada"));
        assert_eq!(presets["tags"], serde_json::json!(["a"]));
    }

    #[test]
    fn preset_without_separator_is_rejected() {
        let matches = build_cli()
            .try_get_matches_from(["cadence", "run", "-f", "demo.yaml", "-i", "oops"])
            .unwrap();
        let (_, run) = matches.subcommand().unwrap();
        assert!(parse_presets(run).is_err());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn malformed_settings_warn_and_fall_back_to_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let log = CapturedLog::default();
        let writer = log.clone();

        let settings = load_settings(&path, move || writer.clone()).unwrap();

        assert_eq!(settings.log_filter, EngineSettings::default().log_filter);
        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Failed to parse settings file"), "missing warning: {output}");
    }

    #[test]
    fn scenario_selection_defaults_to_first() {
        let mut scenarios = IndexMap::new();
        for id in ["first", "second"] {
            scenarios.insert(
                id.to_string(),
                Scenario {
                    id: id.into(),
                    ..Default::default()
                },
            );
        }
        let bundle = ScenarioBundle { scenarios };
        assert_eq!(select_scenario(bundle.clone(), None).unwrap().id, "first");
        assert_eq!(select_scenario(bundle.clone(), Some("second")).unwrap().id, "second");
        assert!(select_scenario(bundle, Some("third")).is_err());
    }
}
