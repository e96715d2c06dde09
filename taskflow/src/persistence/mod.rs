//! Durable task and step tracking.

mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{Task, TaskStep};
use crate::errors::PersistenceError;

pub use memory::InMemoryTaskStore;

/// Storage of tasks and their step rows.
///
/// Step rows are keyed by `(task_id, step_index)`. They are created once,
/// all at the same time, and afterwards only updated in place.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new task.
    async fn create_task(&self, task: &Task) -> Result<(), PersistenceError>;

    /// Loads a task.
    async fn get_task(&self, task_id: Uuid) -> Result<Task, PersistenceError>;

    /// Overwrites an existing task.
    async fn save_task(&self, task: &Task) -> Result<(), PersistenceError>;

    /// Inserts every step row of a task, or none of them.
    async fn create_steps(&self, task_id: Uuid, steps: &[TaskStep]) -> Result<(), PersistenceError>;

    /// Overwrites an existing step row.
    async fn save_step(&self, step: &TaskStep) -> Result<(), PersistenceError>;

    /// Lists the step rows of a task ordered by index.
    async fn list_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>, PersistenceError>;
}
