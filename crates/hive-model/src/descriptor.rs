use serde::{Deserialize, Serialize};

use crate::{Launch, ModelError, TaskName, WorkModel};

/// Immutable description of one task type as loaded from configuration.
///
/// Replaced wholesale on reload; pools are matched to descriptors by [`TaskDescriptor::name`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: TaskName,
    pub queue: String,
    pub work_model: WorkModel,
    pub max_workers: usize,
    #[serde(default)]
    pub launch: Launch,
}

impl TaskDescriptor {
    pub fn new(name: TaskName, work_model: WorkModel, max_workers: usize) -> Self {
        let queue = name.default_queue();
        Self {
            name,
            queue,
            work_model,
            max_workers,
            launch: Launch::Registered,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_launch(mut self, launch: Launch) -> Self {
        self.launch = launch;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.max_workers == 0 {
            return Err(ModelError::ZeroWorkers(self.name.to_string()));
        }
        if self.queue.trim().is_empty() {
            return Err(ModelError::EmptyQueue(self.name.to_string()));
        }
        Ok(())
    }

    /// True when switching from `self` to `other` keeps the same pool (only the ceiling may differ).
    pub fn same_pool_as(&self, other: &TaskDescriptor) -> bool {
        self.name == other.name
            && self.queue == other.queue
            && self.work_model == other.work_model
            && self.launch == other.launch
    }
}
