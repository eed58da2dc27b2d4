//! # Cadence Engine
//!
//! The Cadence engine runs declarative scenarios one node at a time. It computes a
//! deterministic execution order, hands each node either to a registered plugin or to the
//! caller as an input prompt, writes node outputs into a path-addressable context tree,
//! and records every run in an execution history.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cadence_engine::{InMemoryExecutionHistory, PluginRegistry, ScenarioEngine, parse_scenario_file};
//! use serde_json::json;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let scenario_path = temp_dir.path().join("greeting.yaml");
//! std::fs::write(&scenario_path, r#"
//! id: greeting
//! nodes:
//!   - id: name
//!     contextPath: user.name
//! "#)?;
//!
//! let bundle = parse_scenario_file(&scenario_path)?;
//! let mut engine = ScenarioEngine::new(Arc::new(PluginRegistry::new()), Arc::new(InMemoryExecutionHistory::new()));
//! for scenario in bundle.scenarios.into_values() {
//!     engine.register_scenario(scenario);
//! }
//!
//! let execution_id = engine.start_execution("greeting")?;
//! engine.execute_node(&execution_id, "name", json!("ada"))?;
//! assert_eq!(engine.get_by_path("user.name"), json!("ada"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`context`**: the context tree and `${{ ... }}` template interpolation
//! - **`order`**: execution order resolution and the shared prerequisite predicate
//! - **`plugin`**: handler contract, registry, and built-in handlers
//! - **`executor`**: the step machine, its persistence seam, and the engine facade
//! - **`history`**: in-memory and JSON-file execution history
//! - **`run`**: async driver streaming run events over channels
//! - **`board`**: dependency-gated task board

use std::{fs, path::Path};

use anyhow::{Context, Result};
use cadence_types::scenario::validation::validate_scenario_shape;
use indexmap::IndexMap;
use serde::Deserialize;

pub mod board;
pub mod context;
pub mod error;
pub mod executor;
pub mod history;
pub mod order;
pub mod plugin;
pub mod run;

pub use board::{Board, BoardError, StatusChange};
pub use cadence_types::{Scenario, ScenarioBundle};
pub use context::ContextStore;
pub use error::EngineError;
pub use executor::{HistoryPersistence, NodePrompt, NullPersistence, RunPersistence, ScenarioEngine, StepMachine, StepState};
pub use history::{ExecutionHistory, InMemoryExecutionHistory, JsonExecutionHistory, PersistenceError};
pub use order::{ResolveError, compute_order};
pub use plugin::{PluginError, PluginHandler, PluginRegistry, PluginState, RenderRequest, register_builtin_plugins};
pub use run::{ScenarioRunRequest, drive_scenario_run};

/// Loads a scenario file with automatic format detection.
///
/// YAML is a superset of JSON, so both are read with the YAML parser. The document may
/// hold a single scenario or a `scenarios:` map keyed by id; a map entry without an `id`
/// takes its key.
///
/// # Errors
///
/// Returns an error when the file cannot be read, matches neither document shape, or
/// contains a scenario with a missing id or unsupported node ids.
pub fn parse_scenario_file(file_path: impl AsRef<Path>) -> Result<ScenarioBundle> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read scenario file: {}", file_path.display()))?;
    let content_string = String::from_utf8_lossy(&file_content);

    let bundle = parse_scenario_document(&content_string).with_context(|| format!("Invalid scenario file: {}", file_path.display()))?;
    for scenario in bundle.scenarios.values() {
        validate_scenario_shape(scenario).map_err(anyhow::Error::msg)?;
    }
    Ok(bundle)
}

fn parse_scenario_document(content: &str) -> Result<ScenarioBundle> {
    // Multi-scenario documents first so a bundle is never read as one scenario with
    // ignored fields.
    #[derive(Deserialize)]
    struct MultiScenarioDocument {
        scenarios: IndexMap<String, Scenario>,
    }

    if let Ok(document) = serde_yaml::from_str::<MultiScenarioDocument>(content) {
        let scenarios = document
            .scenarios
            .into_iter()
            .map(|(key, mut scenario)| {
                if scenario.id.trim().is_empty() {
                    scenario.id = key.clone();
                }
                (scenario.id.clone(), scenario)
            })
            .collect();
        return Ok(ScenarioBundle { scenarios });
    }

    let scenario = serde_yaml::from_str::<Scenario>(content).context(
        "Unsupported scenario document format. Expected either a single scenario with 'id' and 'nodes' \
         or a multi-scenario document with scenarios under a 'scenarios' key",
    )?;
    let mut scenarios = IndexMap::new();
    scenarios.insert(scenario.id.clone(), scenario);
    Ok(ScenarioBundle { scenarios })
}
