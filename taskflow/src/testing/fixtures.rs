//! Test fixtures for pipeline testing.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::RecordingLedger;
use crate::config::EngineConfig;
use crate::core::{Task, TaskStep};
use crate::errors::TaskflowError;
use crate::events::CollectingEventSink;
use crate::persistence::{InMemoryTaskStore, TaskStore};
use crate::pipeline::{PipelineEngine, PipelineReport};
use crate::providers::{Provider, ProviderRegistry};
use crate::schema::{InMemorySchemaStore, PipelineSchema, StepDefinition};

/// Feature id the harness registers its schema under.
pub const HARNESS_FEATURE: &str = "feature";

/// A fully wired engine over in-memory collaborators.
pub struct PipelineHarness {
    /// The engine under test.
    pub engine: Arc<PipelineEngine>,
    /// The task store.
    pub store: Arc<dyn TaskStore>,
    /// The schema store.
    pub schemas: Arc<InMemorySchemaStore>,
    /// The provider registry.
    pub providers: Arc<ProviderRegistry>,
    /// The quota ledger.
    pub ledger: Arc<RecordingLedger>,
    /// Every emitted lifecycle event.
    pub events: Arc<CollectingEventSink>,
}

/// Outcome of [`PipelineHarness::run`].
#[derive(Debug, Clone)]
pub struct HarnessRun {
    /// The task as stored after the run.
    pub task: Task,
    /// The step rows after the run.
    pub steps: Vec<TaskStep>,
    /// The engine's report.
    pub report: PipelineReport,
}

impl PipelineHarness {
    /// Creates a harness whose feature runs `steps`.
    #[must_use]
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self::builder(steps).build()
    }

    /// Starts configuring a harness.
    #[must_use]
    pub fn builder(steps: Vec<StepDefinition>) -> PipelineHarnessBuilder {
        PipelineHarnessBuilder {
            steps,
            config: EngineConfig::default(),
            store: None,
            ledger: None,
        }
    }

    /// Registers the default provider of a step type.
    pub fn register(&self, step_type: &str, provider: Arc<dyn Provider>) {
        self.providers.register(step_type, provider);
    }

    /// Submits a task for the harness feature and runs it.
    pub async fn run(&self, input: Value) -> Result<HarnessRun, TaskflowError> {
        let task = self.engine.submit(HARNESS_FEATURE, input).await?;
        let report = self.engine.execute_task(task.id).await?;
        self.snapshot(task.id, report).await
    }

    /// Reads back the task and its steps.
    pub async fn snapshot(&self, task_id: Uuid, report: PipelineReport) -> Result<HarnessRun, TaskflowError> {
        Ok(HarnessRun {
            task: self.store.get_task(task_id).await?,
            steps: self.store.list_steps(task_id).await?,
            report,
        })
    }
}

impl std::fmt::Debug for PipelineHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHarness")
            .field("engine", &self.engine)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PipelineHarness`].
pub struct PipelineHarnessBuilder {
    steps: Vec<StepDefinition>,
    config: EngineConfig,
    store: Option<Arc<dyn TaskStore>>,
    ledger: Option<Arc<RecordingLedger>>,
}

impl PipelineHarnessBuilder {
    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a custom task store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses a custom ledger.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<RecordingLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Wires the harness.
    #[must_use]
    pub fn build(self) -> PipelineHarness {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let ledger = self.ledger.unwrap_or_default();
        let schemas = Arc::new(
            InMemorySchemaStore::new()
                .with_pipeline(HARNESS_FEATURE, PipelineSchema::new("pipeline", self.steps)),
        );
        let providers = Arc::new(ProviderRegistry::new());
        let events = Arc::new(CollectingEventSink::new());

        let engine = PipelineEngine::new(
            &self.config,
            schemas.clone(),
            providers.clone(),
            Arc::clone(&store),
            ledger.clone(),
        )
        .with_event_sink(events.clone());

        PipelineHarness {
            engine: Arc::new(engine),
            store,
            schemas,
            providers,
            ledger,
            events,
        }
    }
}
