//! Test assertions for tasks and step rows.

use crate::core::{StepStatus, Task, TaskStatus, TaskStep};

/// Asserts that the task succeeded.
pub fn assert_task_succeeded(task: &Task) {
    assert_eq!(
        task.status,
        TaskStatus::Success,
        "Expected success, got {} ({:?})",
        task.status,
        task.error_message
    );
}

/// Asserts that the task failed at `step_index`.
pub fn assert_task_failed_at(task: &Task, step_index: i64) {
    assert_eq!(task.status, TaskStatus::Failed, "Expected failure, got {}", task.status);
    assert_eq!(
        task.failed_step_index,
        Some(step_index),
        "Expected failure at step {step_index}, got {:?}: {:?}",
        task.failed_step_index,
        task.error_message
    );
}

/// Asserts the status of every step row, in index order.
pub fn assert_step_statuses(steps: &[TaskStep], expected: &[StepStatus]) {
    let actual: Vec<StepStatus> = steps.iter().map(|s| s.status).collect();
    assert_eq!(actual, expected, "Unexpected step statuses");
}
