//! Dependency-gated task board.
//!
//! A task may leave `todo` only when, for every dependency declared by its template task,
//! the sibling task on the same board instance (the one created from that template task)
//! is `done`. The check is the same prerequisite predicate the order resolver uses.

use std::collections::HashSet;

use cadence_types::{BoardInstance, BoardTemplate, Task, TaskStatus};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::order::{prerequisites_satisfied, unsatisfied};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("board template '{0}' not found")]
    TemplateNotFound(String),
    #[error("board instance '{0}' not found")]
    InstanceNotFound(String),
    #[error("board instance '{0}' already exists")]
    DuplicateInstance(String),
    #[error("task '{task_id}' not found on board instance '{instance_id}'")]
    TaskNotFound { instance_id: String, task_id: String },
    #[error("task '{task_id}' is blocked by unfinished tasks: {}", waiting_on.join(", "))]
    Blocked { task_id: String, waiting_on: Vec<String> },
}

/// Outcome of an accepted status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Sibling tasks still in `todo` that this change unblocked.
    pub unblocked: Vec<String>,
}

fn template_dependencies<'a>(template: &'a BoardTemplate, task: &Task) -> impl Iterator<Item = &'a str> {
    template
        .task(&task.template_task_id)
        .into_iter()
        .flat_map(|template_task| template_task.dependencies.iter().map(String::as_str))
}

fn sibling_done(instance: &BoardInstance, template_task_id: &str) -> bool {
    instance
        .sibling_for(template_task_id)
        .is_some_and(|sibling| sibling.status == TaskStatus::Done)
}

/// True when any template dependency of `task` has no `done` sibling on `instance`.
pub fn is_blocked(template: &BoardTemplate, instance: &BoardInstance, task: &Task) -> bool {
    !prerequisites_satisfied(template_dependencies(template, task), |dependency| sibling_done(instance, dependency))
}

/// Template task ids `task` is still waiting on, in declaration order.
pub fn waiting_on<'a>(template: &'a BoardTemplate, instance: &BoardInstance, task: &Task) -> Vec<&'a str> {
    unsatisfied(template_dependencies(template, task), |dependency| sibling_done(instance, dependency))
}

/// Move a task to `new_status`, rejecting any move out of `todo` while it is blocked.
pub fn advance(
    template: &BoardTemplate,
    instance: &mut BoardInstance,
    task_id: &str,
    new_status: TaskStatus,
) -> Result<StatusChange, BoardError> {
    let Some(position) = instance.tasks.iter().position(|task| task.id == task_id) else {
        return Err(BoardError::TaskNotFound {
            instance_id: instance.id.clone(),
            task_id: task_id.to_string(),
        });
    };
    let task = &instance.tasks[position];
    let from = task.status;

    if from == TaskStatus::Todo && new_status != TaskStatus::Todo {
        let waiting = waiting_on(template, instance, task);
        if !waiting.is_empty() {
            debug!(task_id, waiting_on = ?waiting, "task transition blocked");
            return Err(BoardError::Blocked {
                task_id: task_id.to_string(),
                waiting_on: waiting.into_iter().map(str::to_string).collect(),
            });
        }
    }

    let blocked_before: HashSet<String> = blocked_todo_tasks(template, instance).collect();
    instance.tasks[position].status = new_status;
    let unblocked: Vec<String> = instance
        .tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Todo && blocked_before.contains(&task.id) && !is_blocked(template, instance, task))
        .map(|task| task.id.clone())
        .collect();

    info!(instance_id = %instance.id, task_id, %from, to = %new_status, unblocked = ?unblocked, "task status changed");
    Ok(StatusChange {
        task_id: task_id.to_string(),
        from,
        to: new_status,
        unblocked,
    })
}

fn blocked_todo_tasks<'a>(template: &'a BoardTemplate, instance: &'a BoardInstance) -> impl Iterator<Item = String> + 'a {
    instance
        .tasks
        .iter()
        .filter(move |task| task.status == TaskStatus::Todo && is_blocked(template, instance, task))
        .map(|task| task.id.clone())
}

/// Templates and their live instances.
#[derive(Debug, Default)]
pub struct Board {
    templates: IndexMap<String, BoardTemplate>,
    instances: IndexMap<String, BoardInstance>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&mut self, template: BoardTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Create an instance with one `todo` task per template task.
    ///
    /// Task ids are `<instance id>:<template task id>`.
    pub fn instantiate(&mut self, template_id: &str, instance_id: &str) -> Result<&BoardInstance, BoardError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| BoardError::TemplateNotFound(template_id.to_string()))?;
        if self.instances.contains_key(instance_id) {
            return Err(BoardError::DuplicateInstance(instance_id.to_string()));
        }
        let tasks = template
            .tasks
            .iter()
            .map(|template_task| Task {
                id: format!("{instance_id}:{}", template_task.id),
                template_task_id: template_task.id.clone(),
                title: template_task.title.clone(),
                status: TaskStatus::Todo,
            })
            .collect();
        let instance = BoardInstance {
            id: instance_id.to_string(),
            template_id: template_id.to_string(),
            tasks,
        };
        debug!(instance_id, template_id, "board instance created");
        Ok(self.instances.entry(instance_id.to_string()).or_insert(instance))
    }

    pub fn instance(&self, instance_id: &str) -> Option<&BoardInstance> {
        self.instances.get(instance_id)
    }

    pub fn is_blocked(&self, instance_id: &str, task_id: &str) -> Result<bool, BoardError> {
        let (template, instance) = self.parts(instance_id)?;
        let task = instance.task(task_id).ok_or_else(|| BoardError::TaskNotFound {
            instance_id: instance_id.to_string(),
            task_id: task_id.to_string(),
        })?;
        Ok(is_blocked(template, instance, task))
    }

    pub fn update_instance_task_status(
        &mut self,
        instance_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<StatusChange, BoardError> {
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BoardError::InstanceNotFound(instance_id.to_string()))?;
        let template = self
            .templates
            .get(&instance.template_id)
            .ok_or_else(|| BoardError::TemplateNotFound(instance.template_id.clone()))?;
        advance(template, instance, task_id, status)
    }

    fn parts(&self, instance_id: &str) -> Result<(&BoardTemplate, &BoardInstance), BoardError> {
        let instance = self
            .instances
            .get(instance_id)
            .ok_or_else(|| BoardError::InstanceNotFound(instance_id.to_string()))?;
        let template = self
            .templates
            .get(&instance.template_id)
            .ok_or_else(|| BoardError::TemplateNotFound(instance.template_id.clone()))?;
        Ok((template, instance))
    }
}
