//! Mock collaborators for testing pipelines.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

use crate::context::TaskContext;
use crate::core::{StepStatus, Task, TaskStep};
use crate::errors::{PersistenceError, ProviderError};
use crate::persistence::{InMemoryTaskStore, TaskStore};
use crate::providers::Provider;
use crate::saga::QuotaLedger;

/// A provider replaying scripted results.
///
/// Scripted results are consumed in order; once the script is exhausted
/// every call returns the default result.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Value, ProviderError>>>,
    default: Result<Value, ProviderError>,
    delay: Option<Duration>,
    inputs: Mutex<Vec<Value>>,
}

impl ScriptedProvider {
    /// A provider that always returns `output`.
    #[must_use]
    pub fn returning(output: Value) -> Self {
        Self::with_default(Ok(output))
    }

    /// A provider that always fails with `error`.
    #[must_use]
    pub fn failing(error: ProviderError) -> Self {
        Self::with_default(Err(error))
    }

    /// A provider replaying `script`, then returning `then`.
    #[must_use]
    pub fn sequence(script: Vec<Result<Value, ProviderError>>, then: Result<Value, ProviderError>) -> Self {
        let provider = Self::with_default(then);
        *provider.script.lock() = script.into();
        provider
    }

    fn with_default(default: Result<Value, ProviderError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the inputs of every call.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value, ProviderError> {
        self.inputs.lock().push(input);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.default.clone())
    }
}

/// A quota ledger recording every call.
#[derive(Debug, Default)]
pub struct RecordingLedger {
    confirmed: Mutex<Vec<Uuid>>,
    cancelled: Mutex<Vec<Uuid>>,
    failure: Option<String>,
}

impl RecordingLedger {
    /// Creates a ledger accepting every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that records calls and then fails them.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Returns confirmed task ids in call order.
    #[must_use]
    pub fn confirmed(&self) -> Vec<Uuid> {
        self.confirmed.lock().clone()
    }

    /// Returns cancelled task ids in call order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<Uuid> {
        self.cancelled.lock().clone()
    }

    /// Returns how many times a task was confirmed.
    #[must_use]
    pub fn confirm_count(&self, task_id: Uuid) -> usize {
        self.confirmed.lock().iter().filter(|id| **id == task_id).count()
    }

    /// Returns how many times a task was cancelled.
    #[must_use]
    pub fn cancel_count(&self, task_id: Uuid) -> usize {
        self.cancelled.lock().iter().filter(|id| **id == task_id).count()
    }

    fn outcome(&self) -> anyhow::Result<()> {
        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QuotaLedger for RecordingLedger {
    async fn confirm(&self, task_id: Uuid) -> anyhow::Result<()> {
        self.confirmed.lock().push(task_id);
        self.outcome()
    }

    async fn cancel(&self, task_id: Uuid) -> anyhow::Result<()> {
        self.cancelled.lock().push(task_id);
        self.outcome()
    }
}

/// A task store that fails selected writes and delegates everything else
/// to an [`InMemoryTaskStore`].
#[derive(Debug, Default)]
pub struct FailingTaskStore {
    inner: InMemoryTaskStore,
    fail_create_steps: bool,
    fail_step_save: Option<(usize, StepStatus)>,
    fail_task_save: Option<crate::core::TaskStatus>,
    fail_task_read: Option<crate::core::TaskStatus>,
    unacked_task_save: Option<crate::core::TaskStatus>,
}

impl FailingTaskStore {
    /// Creates a store that fails nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails step row creation.
    #[must_use]
    pub fn fail_create_steps(mut self) -> Self {
        self.fail_create_steps = true;
        self
    }

    /// Fails saving step `index` when it carries `status`.
    #[must_use]
    pub fn fail_step_save(mut self, index: usize, status: StepStatus) -> Self {
        self.fail_step_save = Some((index, status));
        self
    }

    /// Fails saving a task that carries `status`.
    #[must_use]
    pub fn fail_task_save(mut self, status: crate::core::TaskStatus) -> Self {
        self.fail_task_save = Some(status);
        self
    }

    /// Fails reading a task whose stored status is `status`.
    #[must_use]
    pub fn fail_task_read(mut self, status: crate::core::TaskStatus) -> Self {
        self.fail_task_read = Some(status);
        self
    }

    /// Stores a task that carries `status` but still reports the save as
    /// failed.
    #[must_use]
    pub fn unacked_task_save(mut self, status: crate::core::TaskStatus) -> Self {
        self.unacked_task_save = Some(status);
        self
    }

    /// Returns the backing store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryTaskStore {
        &self.inner
    }

    fn injected(what: &str) -> PersistenceError {
        PersistenceError::Backend(format!("injected {what} failure"))
    }
}

#[async_trait]
impl TaskStore for FailingTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), PersistenceError> {
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, PersistenceError> {
        let task = self.inner.get_task(task_id).await?;
        if self.fail_task_read == Some(task.status) {
            return Err(Self::injected("get_task"));
        }
        Ok(task)
    }

    async fn save_task(&self, task: &Task) -> Result<(), PersistenceError> {
        if self.fail_task_save == Some(task.status) {
            return Err(Self::injected("save_task"));
        }
        self.inner.save_task(task).await?;
        if self.unacked_task_save == Some(task.status) {
            return Err(Self::injected("save_task acknowledgement"));
        }
        Ok(())
    }

    async fn create_steps(&self, task_id: Uuid, steps: &[TaskStep]) -> Result<(), PersistenceError> {
        if self.fail_create_steps {
            return Err(Self::injected("create_steps"));
        }
        self.inner.create_steps(task_id, steps).await
    }

    async fn save_step(&self, step: &TaskStep) -> Result<(), PersistenceError> {
        if self.fail_step_save == Some((step.step_index, step.status)) {
            return Err(Self::injected("save_step"));
        }
        self.inner.save_step(step).await
    }

    async fn list_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>, PersistenceError> {
        self.inner.list_steps(task_id).await
    }
}
