//! Task and task step records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{StepStatus, TaskStatus, TransitionError};
use crate::utils::{now_utc, Timestamp};

/// Step index recorded when a failure is not attributable to any step.
pub const PIPELINE_LEVEL_INDEX: i64 = -1;

/// One end-to-end unit of work requested by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: Uuid,
    /// Feature whose pipeline this task runs.
    pub feature_id: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// The caller-supplied input payload.
    pub input: serde_json::Value,
    /// The final carried value once the pipeline succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    /// Legacy mirror of a `result_url` field found in the artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Index of the failing step, or -1 for pipeline-level failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step_index: Option<i64>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Time the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl Task {
    /// Creates a new pending task.
    #[must_use]
    pub fn new(feature_id: impl Into<String>, input: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4(), feature_id, input)
    }

    /// Creates a new pending task with a known id.
    #[must_use]
    pub fn with_id(id: Uuid, feature_id: impl Into<String>, input: serde_json::Value) -> Self {
        let now = now_utc();
        Self {
            id,
            feature_id: feature_id.into(),
            status: TaskStatus::Pending,
            input,
            artifacts: None,
            result_url: None,
            error_message: None,
            failed_step_index: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::new("task", self.status, next));
        }
        self.status = next;
        self.updated_at = now_utc();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Marks the task as processing.
    pub fn mark_processing(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Processing)
    }

    /// Marks the task as successful and stores the final artifacts.
    ///
    /// A string `result_url` (or `resultUrl`) field in the artifacts is
    /// mirrored into [`Task::result_url`].
    pub fn mark_success(&mut self, artifacts: serde_json::Value) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Success)?;
        self.result_url = ["result_url", "resultUrl"]
            .iter()
            .find_map(|key| artifacts.get(key).and_then(|v| v.as_str()))
            .map(String::from);
        self.artifacts = Some(artifacts);
        Ok(())
    }

    /// Marks the task as failed.
    pub fn mark_failed(
        &mut self,
        step_index: i64,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Failed)?;
        self.failed_step_index = Some(step_index);
        self.error_message = Some(message.into());
        Ok(())
    }
}

/// Execution record of one step of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    /// Owning task.
    pub task_id: Uuid,
    /// Position in the pipeline (0-based).
    pub step_index: usize,
    /// Step type.
    pub step_type: String,
    /// Provider reference.
    pub provider_ref: String,
    /// Execution status.
    pub status: StepStatus,
    /// Input snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Output snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl TaskStep {
    /// Creates a pending step row.
    #[must_use]
    pub fn pending(
        task_id: Uuid,
        step_index: usize,
        step_type: impl Into<String>,
        provider_ref: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            step_index,
            step_type: step_type.into(),
            provider_ref: provider_ref.into(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Sets the input snapshot.
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    fn transition(&mut self, next: StepStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::new("step", self.status, next));
        }
        self.status = next;
        Ok(())
    }

    /// Marks the step as processing with the given input.
    pub fn mark_processing(&mut self, input: serde_json::Value) -> Result<(), TransitionError> {
        self.transition(StepStatus::Processing)?;
        self.input = Some(input);
        self.started_at = Some(now_utc());
        Ok(())
    }

    /// Marks the step as completed with the given output.
    pub fn mark_completed(&mut self, output: serde_json::Value) -> Result<(), TransitionError> {
        self.transition(StepStatus::Completed)?;
        self.output = Some(output);
        self.completed_at = Some(now_utc());
        Ok(())
    }

    /// Marks the step as failed.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(StepStatus::Failed)?;
        self.error_message = Some(message.into());
        self.completed_at = Some(now_utc());
        Ok(())
    }

    /// Returns the step duration in milliseconds once finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_lifecycle_success() {
        let mut task = Task::new("portrait", json!({"x": 1}));
        assert_eq!(task.status, TaskStatus::Pending);

        task.mark_processing().unwrap();
        task.mark_success(json!({"result_url": "https://cdn/x.png", "z": 3}))
            .unwrap();

        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.result_url.as_deref(), Some("https://cdn/x.png"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_task_result_url_camel_case() {
        let mut task = Task::new("f", json!({}));
        task.mark_processing().unwrap();
        task.mark_success(json!({"resultUrl": "u"})).unwrap();
        assert_eq!(task.result_url.as_deref(), Some("u"));
    }

    #[test]
    fn test_terminal_task_cannot_reenter_processing() {
        let mut task = Task::new("f", json!({}));
        task.mark_processing().unwrap();
        task.mark_failed(0, "boom").unwrap();

        let err = task.mark_processing().unwrap_err();
        assert_eq!(err.entity, "task");
        assert_eq!(err.from, "failed");
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_pending_task_can_fail_directly() {
        let mut task = Task::new("f", json!({}));
        task.mark_failed(PIPELINE_LEVEL_INDEX, "no schema").unwrap();
        assert_eq!(task.failed_step_index, Some(-1));
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = TaskStep::pending(Uuid::new_v4(), 0, "A", "default");
        step.mark_processing(json!({"x": 1})).unwrap();
        step.mark_completed(json!({"y": 2})).unwrap();

        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.output, Some(json!({"y": 2})));
        assert!(step.duration_ms().is_some());
        assert!(step.mark_failed("late").is_err());
    }
}
