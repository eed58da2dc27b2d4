//! Kanban-style board definitions whose task transitions are dependency gated.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a board task instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "inProgress",
            TaskStatus::Done => "done",
        };
        formatter.write_str(label)
    }
}

/// Template-level task declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskTemplate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Template task ids that must be done first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Board template from which instances are created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BoardTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

impl BoardTemplate {
    pub fn task(&self, template_task_id: &str) -> Option<&TaskTemplate> {
        self.tasks.iter().find(|task| task.id == template_task_id)
    }
}

/// Task instance living on a board instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Back-reference to the template task.
    pub template_task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Board instance instantiated from a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoardInstance {
    pub id: String,
    pub template_id: String,
    pub tasks: Vec<Task>,
}

impl BoardInstance {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    /// Sibling instance created from the given template task.
    pub fn sibling_for(&self, template_task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.template_task_id == template_task_id)
    }
}
