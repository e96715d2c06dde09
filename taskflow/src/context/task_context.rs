//! Per-invocation context handed to providers.

use std::sync::Arc;
use uuid::Uuid;

use super::SharedState;
use crate::events::EventSink;

/// Context available to a provider while it executes one step.
///
/// Cloning is cheap: the shared state and event sink are reference counted,
/// so every step of a task sees the same state.
#[derive(Clone)]
pub struct TaskContext {
    task_id: Uuid,
    feature_id: String,
    step_index: usize,
    step_type: String,
    provider_ref: String,
    state: Arc<SharedState>,
    event_sink: Arc<dyn EventSink>,
}

impl TaskContext {
    /// Creates a context for a task, positioned before its first step.
    #[must_use]
    pub fn new(
        task_id: Uuid,
        feature_id: impl Into<String>,
        state: Arc<SharedState>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            task_id,
            feature_id: feature_id.into(),
            step_index: 0,
            step_type: String::new(),
            provider_ref: String::new(),
            state,
            event_sink,
        }
    }

    /// Returns a copy positioned at the given step.
    #[must_use]
    pub fn for_step(
        &self,
        step_index: usize,
        step_type: impl Into<String>,
        provider_ref: impl Into<String>,
    ) -> Self {
        Self {
            step_index,
            step_type: step_type.into(),
            provider_ref: provider_ref.into(),
            ..self.clone()
        }
    }

    /// Returns the task id.
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Returns the feature id.
    #[must_use]
    pub fn feature_id(&self) -> &str {
        &self.feature_id
    }

    /// Returns the current step index.
    #[must_use]
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Returns the current step type.
    #[must_use]
    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    /// Returns the current provider reference.
    #[must_use]
    pub fn provider_ref(&self) -> &str {
        &self.provider_ref
    }

    /// Returns the shared flow state.
    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Emits an event tagged with the task and step.
    pub fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut payload = serde_json::json!({
            "task_id": self.task_id.to_string(),
            "feature_id": self.feature_id,
            "step_index": self.step_index,
        });
        if let Some(serde_json::Value::Object(extra)) = data {
            if let Some(map) = payload.as_object_mut() {
                map.extend(extra);
            }
        }
        self.event_sink.try_emit(event_type, Some(payload));
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("feature_id", &self.feature_id)
            .field("step_index", &self.step_index)
            .field("step_type", &self.step_type)
            .field("provider_ref", &self.provider_ref)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    #[test]
    fn test_for_step_shares_state() {
        let state = Arc::new(SharedState::new());
        let ctx = TaskContext::new(Uuid::new_v4(), "f", state, Arc::new(CollectingEventSink::new()));
        let step_ctx = ctx.for_step(2, "llm", "gpt");

        step_ctx.state().set("k", serde_json::json!(1));

        assert_eq!(step_ctx.step_index(), 2);
        assert_eq!(step_ctx.provider_ref(), "gpt");
        assert_eq!(ctx.state().get("k"), Some(serde_json::json!(1)));
    }

    #[test]
    fn test_emit_event_tags_task() {
        let sink = Arc::new(CollectingEventSink::new());
        let task_id = Uuid::new_v4();
        let ctx = TaskContext::new(task_id, "f", Arc::new(SharedState::new()), sink.clone())
            .for_step(1, "a", "b");

        ctx.try_emit_event("tool.called", Some(serde_json::json!({"tool": "search"})));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let data = events[0].1.clone().unwrap();
        assert_eq!(data["task_id"], task_id.to_string());
        assert_eq!(data["step_index"], 1);
        assert_eq!(data["tool"], "search");
    }
}
