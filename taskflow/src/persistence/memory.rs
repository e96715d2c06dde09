//! In-memory task store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::TaskStore;
use crate::core::{Task, TaskStep};
use crate::errors::PersistenceError;

#[derive(Debug, Default)]
struct Tables {
    tasks: HashMap<Uuid, Task>,
    steps: HashMap<Uuid, BTreeMap<usize, TaskStep>>,
}

/// A [`TaskStore`] keeping everything in process memory.
///
/// Both tables sit behind one lock so multi-row writes are atomic.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tables: RwLock<Tables>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tables.read().tasks.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), PersistenceError> {
        let mut tables = self.tables.write();
        if tables.tasks.contains_key(&task.id) {
            return Err(PersistenceError::Conflict(format!("task {} already exists", task.id)));
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, PersistenceError> {
        self.tables
            .read()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(PersistenceError::TaskNotFound(task_id))
    }

    async fn save_task(&self, task: &Task) -> Result<(), PersistenceError> {
        let mut tables = self.tables.write();
        match tables.tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(PersistenceError::TaskNotFound(task.id)),
        }
    }

    async fn create_steps(&self, task_id: Uuid, steps: &[TaskStep]) -> Result<(), PersistenceError> {
        let mut tables = self.tables.write();
        if !tables.tasks.contains_key(&task_id) {
            return Err(PersistenceError::TaskNotFound(task_id));
        }
        if tables.steps.get(&task_id).is_some_and(|rows| !rows.is_empty()) {
            return Err(PersistenceError::Conflict(format!(
                "steps already exist for task {task_id}"
            )));
        }

        let mut rows = BTreeMap::new();
        for step in steps {
            if step.task_id != task_id {
                return Err(PersistenceError::Conflict(format!(
                    "step {} belongs to task {}",
                    step.step_index, step.task_id
                )));
            }
            if rows.insert(step.step_index, step.clone()).is_some() {
                return Err(PersistenceError::Conflict(format!(
                    "duplicate step index {}",
                    step.step_index
                )));
            }
        }

        tables.steps.insert(task_id, rows);
        Ok(())
    }

    async fn save_step(&self, step: &TaskStep) -> Result<(), PersistenceError> {
        let mut tables = self.tables.write();
        let stored = tables
            .steps
            .get_mut(&step.task_id)
            .and_then(|rows| rows.get_mut(&step.step_index))
            .ok_or(PersistenceError::StepNotFound {
                task_id: step.task_id,
                step_index: step.step_index,
            })?;
        *stored = step.clone();
        Ok(())
    }

    async fn list_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>, PersistenceError> {
        Ok(self
            .tables
            .read()
            .steps
            .get(&task_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepStatus, TaskStatus};
    use serde_json::json;

    fn steps_for(task_id: Uuid, n: usize) -> Vec<TaskStep> {
        (0..n)
            .map(|i| TaskStep::pending(task_id, i, format!("type{i}"), "default"))
            .collect()
    }

    #[tokio::test]
    async fn test_task_roundtrip_and_update() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("feature", json!({"x": 1}));
        store.create_task(&task).await.unwrap();

        task.mark_processing().unwrap();
        store.save_task(&task).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert_eq!(store.task_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_task_conflicts() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("feature", json!({}));
        store.create_task(&task).await.unwrap();
        assert!(matches!(
            store.create_task(&task).await,
            Err(PersistenceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_task() {
        let store = InMemoryTaskStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.get_task(id).await.unwrap_err(), PersistenceError::TaskNotFound(id));
        assert_eq!(
            store.save_task(&Task::with_id(id, "f", json!({}))).await.unwrap_err(),
            PersistenceError::TaskNotFound(id)
        );
    }

    #[tokio::test]
    async fn test_create_steps_all_or_nothing() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("feature", json!({}));
        store.create_task(&task).await.unwrap();

        let mut bad = steps_for(task.id, 3);
        bad[2].step_index = 1;
        assert!(store.create_steps(task.id, &bad).await.is_err());
        assert!(store.list_steps(task.id).await.unwrap().is_empty());

        store.create_steps(task.id, &steps_for(task.id, 3)).await.unwrap();
        let rows = store.list_steps(task.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|s| s.status == StepStatus::Pending));

        assert!(matches!(
            store.create_steps(task.id, &steps_for(task.id, 1)).await,
            Err(PersistenceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_save_step_updates_in_place() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("feature", json!({}));
        store.create_task(&task).await.unwrap();
        store.create_steps(task.id, &steps_for(task.id, 2)).await.unwrap();

        let mut step = store.list_steps(task.id).await.unwrap().remove(1);
        step.mark_processing(json!({"in": 1})).unwrap();
        step.mark_completed(json!({"out": 2})).unwrap();
        store.save_step(&step).await.unwrap();

        let rows = store.list_steps(task.id).await.unwrap();
        assert_eq!(rows[1].status, StepStatus::Completed);
        assert_eq!(rows[1].output, Some(json!({"out": 2})));
        assert_eq!(rows[0].status, StepStatus::Pending);

        let ghost = TaskStep::pending(task.id, 9, "x", "default");
        assert!(matches!(
            store.save_step(&ghost).await,
            Err(PersistenceError::StepNotFound { step_index: 9, .. })
        ));
    }
}
