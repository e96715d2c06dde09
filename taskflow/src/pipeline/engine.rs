//! Sequential pipeline orchestration with saga compensation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::runner::{StepOutcome, StepRunner};
use crate::config::EngineConfig;
use crate::context::{SharedState, TaskContext};
use crate::core::{Task, TaskStatus, TaskStep, PIPELINE_LEVEL_INDEX};
use crate::errors::TaskflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::persistence::TaskStore;
use crate::providers::ProviderRegistry;
use crate::resilience::{CircuitBreakerRegistry, ResilienceWrapper};
use crate::saga::{CompensationReport, Outcome, QuotaLedger, SagaCompensator};
use crate::schema::SchemaStore;
use crate::utils::duration_ms;

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// The task id.
    pub task_id: Uuid,
    /// Terminal task status.
    pub status: TaskStatus,
    /// Number of steps that completed.
    pub steps_completed: usize,
    /// Total number of steps in the schema, 0 if it never resolved.
    pub steps_total: usize,
    /// Failing step index, -1 for pipeline-level failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step_index: Option<i64>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Final carried value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Value>,
    /// Outcome of the quota compensation.
    pub compensation: CompensationReport,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl PipelineReport {
    /// Returns true if the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    completed: usize,
    total: usize,
}

/// Drives a feature's pipeline for a task.
///
/// Steps run strictly in schema order; the output of each step is the input
/// of the next. The first failing step aborts the pipeline. On the terminal
/// outcome the quota reservation is confirmed or cancelled.
pub struct PipelineEngine {
    schemas: Arc<dyn SchemaStore>,
    store: Arc<dyn TaskStore>,
    runner: StepRunner,
    compensator: SagaCompensator,
    event_sink: Arc<dyn EventSink>,
}

impl PipelineEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        schemas: Arc<dyn SchemaStore>,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn TaskStore>,
        ledger: Arc<dyn QuotaLedger>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_mailbox_capacity));
        let runner = StepRunner::new(
            providers,
            Arc::clone(&store),
            ResilienceWrapper::new(breakers),
            config,
        );

        Self {
            schemas,
            store,
            runner,
            compensator: SagaCompensator::new(ledger),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.compensator = self.compensator.with_event_sink(Arc::clone(&sink));
        self.event_sink = sink;
        self
    }

    /// Shares circuit breakers with other engines.
    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.runner = self.runner.with_wrapper(ResilienceWrapper::new(breakers));
        self
    }

    /// Returns the circuit breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        self.runner.wrapper().breakers()
    }

    /// Returns the task store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Creates a pending task ready to be executed.
    pub async fn submit(&self, feature_id: impl Into<String>, input: Value) -> Result<Task, TaskflowError> {
        let task = Task::new(feature_id, input);
        self.store.create_task(&task).await?;
        info!(task_id = %task.id, feature_id = %task.feature_id, "Task submitted");
        Ok(task)
    }

    /// Executes a stored task with its own feature and input.
    pub async fn execute_task(&self, task_id: Uuid) -> Result<PipelineReport, TaskflowError> {
        let task = self.store.get_task(task_id).await?;
        self.execute_pipeline(task.id, &task.feature_id, task.input).await
    }

    /// Runs the pipeline of `feature_id` for a pending task.
    ///
    /// Returns `Err` only when the task cannot be run at all: it does not
    /// exist or is not pending. Such a task is left untouched and no
    /// compensation happens. Every other failure ends in a failed task and
    /// an `Ok` report.
    pub async fn execute_pipeline(
        &self,
        task_id: Uuid,
        feature_id: &str,
        input: Value,
    ) -> Result<PipelineReport, TaskflowError> {
        let span = info_span!("pipeline", task_id = %task_id, feature_id = %feature_id);
        self.run(task_id, feature_id, input).instrument(span).await
    }

    /// Runs the pipeline on a background task.
    pub fn spawn_pipeline(
        self: &Arc<Self>,
        task_id: Uuid,
        feature_id: impl Into<String>,
        input: Value,
    ) -> JoinHandle<Result<PipelineReport, TaskflowError>> {
        let engine = Arc::clone(self);
        let feature_id = feature_id.into();
        tokio::spawn(async move { engine.execute_pipeline(task_id, &feature_id, input).await })
    }

    async fn run(&self, task_id: Uuid, feature_id: &str, input: Value) -> Result<PipelineReport, TaskflowError> {
        let started = Instant::now();
        let mut task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Pending {
            warn!(status = %task.status, "Rejecting task that is not pending");
            return Err(TaskflowError::TaskRejected {
                task_id,
                reason: format!("task is {}", task.status),
            });
        }

        info!("Pipeline started");
        self.event_sink.try_emit(
            "pipeline.started",
            Some(json!({"task_id": task_id, "feature_id": feature_id})),
        );

        let mut progress = Progress::default();
        let result = self.drive(&mut task, feature_id, input, &mut progress).await;
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "Pipeline aborted");
                let mut latest = match self.store.get_task(task_id).await {
                    Ok(stored) => stored,
                    Err(_) => task,
                };
                self.fail(
                    &mut latest,
                    PIPELINE_LEVEL_INDEX,
                    format!("Pipeline execution failed: {err}"),
                    progress,
                )
                .await
            }
        };

        Ok(PipelineReport {
            duration_ms: duration_ms(started.elapsed()),
            ..report
        })
    }

    async fn drive(
        &self,
        task: &mut Task,
        feature_id: &str,
        input: Value,
        progress: &mut Progress,
    ) -> Result<PipelineReport, TaskflowError> {
        let schema = match self.schemas.get_schema(feature_id).await {
            Ok(schema) => schema,
            Err(err) => {
                warn!(error = %err, "Schema resolution failed");
                return Ok(self
                    .fail(task, PIPELINE_LEVEL_INDEX, err.to_string(), *progress)
                    .await);
            }
        };
        progress.total = schema.len();

        for (index, step) in schema.steps.iter().enumerate() {
            if let Err(err) = self.runner.providers().resolve(&step.step_type, &step.provider_ref) {
                warn!(step_index = index, error = %err, "Provider resolution failed");
                let message = format!("Step {} execution failed: {}", index + 1, err);
                let step_index = i64::try_from(index).unwrap_or(i64::MAX);
                return Ok(self.fail(task, step_index, message, *progress).await);
            }
        }

        task.mark_processing()?;
        self.store.save_task(task).await?;

        let rows: Vec<TaskStep> = schema
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let row = TaskStep::pending(task.id, index, &step.step_type, &step.provider_ref);
                if index == 0 {
                    row.with_input(input.clone())
                } else {
                    row
                }
            })
            .collect();
        self.store.create_steps(task.id, &rows).await?;

        let state = Arc::new(SharedState::from_input(&input));
        let ctx = TaskContext::new(task.id, feature_id, state, Arc::clone(&self.event_sink));
        let mut carried = input;

        for (index, step) in schema.steps.iter().enumerate() {
            let step_ctx = ctx.for_step(index, &step.step_type, &step.provider_ref);
            match self.runner.execute_step(&step_ctx, index, step, carried).await? {
                StepOutcome::Completed { output } => {
                    progress.completed += 1;
                    carried = output;
                }
                StepOutcome::Failed { error } => {
                    let message = format!("Step {} execution failed: {}", index + 1, error);
                    let step_index = i64::try_from(index).unwrap_or(i64::MAX);
                    return Ok(self.fail(task, step_index, message, *progress).await);
                }
            }
        }

        let processing = task.clone();
        task.mark_success(carried)?;
        if let Err(err) = self.store.save_task(task).await {
            // The success was never stored; the failure path must see the
            // task as still running so it is failed and cancelled.
            *task = processing;
            return Err(err.into());
        }
        info!(steps = progress.completed, "Pipeline completed");
        self.event_sink.try_emit(
            "pipeline.completed",
            Some(json!({"task_id": task.id, "steps": progress.completed})),
        );

        let compensation = self.compensator.compensate(task.id, Outcome::Success).await;
        Ok(Self::report(task, compensation, *progress))
    }

    async fn fail(&self, task: &mut Task, step_index: i64, message: String, progress: Progress) -> PipelineReport {
        if task.status == TaskStatus::Success {
            // The compensation follows the stored status so the report and
            // the ledger agree.
            warn!(error = %message, "Task already succeeded; confirming instead of failing");
            let compensation = self.compensator.compensate(task.id, Outcome::Success).await;
            return Self::report(task, compensation, progress);
        }

        if task.status.is_terminal() {
            warn!(status = %task.status, "Task already terminal; not marking failed");
        } else {
            match task.mark_failed(step_index, message.clone()) {
                Ok(()) => {
                    if let Err(err) = self.store.save_task(task).await {
                        error!(error = %err, "Failed to persist task failure");
                    }
                }
                Err(err) => error!(error = %err, "Failed to mark task failed"),
            }
        }

        warn!(step_index, error = %message, "Pipeline failed");
        self.event_sink.try_emit(
            "pipeline.failed",
            Some(json!({
                "task_id": task.id,
                "step_index": step_index,
                "error": message,
            })),
        );

        let compensation = self.compensator.compensate(task.id, Outcome::Failure).await;
        Self::report(task, compensation, progress)
    }

    fn report(task: &Task, compensation: CompensationReport, progress: Progress) -> PipelineReport {
        PipelineReport {
            task_id: task.id,
            status: task.status,
            steps_completed: progress.completed,
            steps_total: progress.total,
            failed_step_index: task.failed_step_index,
            error_message: task.error_message.clone(),
            artifacts: task.artifacts.clone(),
            compensation,
            duration_ms: 0,
        }
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}
