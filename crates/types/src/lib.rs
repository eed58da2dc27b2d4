//! Shared type definitions for the Cadence scenario engine.
//!
//! Everything here is plain data: scenario templates, execution records, board
//! templates/instances, and the run event/control vocabulary. Behavior lives in
//! `cadence-engine`.

pub mod board;
pub mod execution;
pub mod run;
pub mod scenario;

pub use board::{BoardInstance, BoardTemplate, Task, TaskStatus, TaskTemplate};
pub use execution::{Execution, ExecutionId, ExecutionStatus, NodeResult};
pub use run::{AwaitKind, Message, RunControl, RunEvent};
pub use scenario::{INPUT_NODE_TYPE, Node, NodeInputValidation, NodeTransform, Scenario, ScenarioBundle};
