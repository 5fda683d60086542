//! Startup-time map from task type name to its entry point.
use std::collections::BTreeMap;

use hive_model::{TaskName, WorkModel};

use crate::{error::CoreError, task::TaskRef};

/// A registered task type.
#[derive(Clone)]
pub struct TaskType {
    pub name: TaskName,
    pub queue: String,
    pub work_model: WorkModel,
    pub task: TaskRef,
}

impl TaskType {
    /// Queue defaults to the name in lowercase snake form.
    pub fn new(name: TaskName, work_model: WorkModel, task: TaskRef) -> Self {
        Self {
            queue: name.default_queue(),
            name,
            work_model,
            task,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }
}

impl std::fmt::Debug for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskType")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("work_model", &self.work_model)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    types: BTreeMap<TaskName, TaskType>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: TaskType) -> Result<(), CoreError> {
        if self.types.contains_key(&task_type.name) {
            return Err(CoreError::DuplicateTask(task_type.name.to_string()));
        }
        self.types.insert(task_type.name.clone(), task_type);
        Ok(())
    }

    pub fn with(mut self, task_type: TaskType) -> Result<Self, CoreError> {
        self.register(task_type)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&TaskType> {
        self.types.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
