//! Execution of a single pipeline step.

use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::context::TaskContext;
use crate::core::TaskStep;
use crate::errors::{ProviderError, ProviderResolutionError, TaskflowError};
use crate::persistence::TaskStore;
use crate::providers::{Provider, ProviderRegistry};
use crate::resilience::{BreakerKey, CallOptions, FallbackFn, ResilienceWrapper};
use crate::schema::{FallbackSpec, ResiliencePolicy, StepDefinition};

/// Result of one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The provider (or its fallback) produced an output.
    Completed {
        /// The step output, carried into the next step.
        output: Value,
    },
    /// The step failed after the resilience policy was exhausted.
    Failed {
        /// The root cause.
        error: TaskflowError,
    },
}

impl StepOutcome {
    /// Returns true for a completed step.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs one step: resolves its provider, applies the resilience wrapper and
/// persists every status change of the step row.
#[derive(Clone)]
pub struct StepRunner {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn TaskStore>,
    wrapper: ResilienceWrapper,
    default_timeout: Duration,
    default_policy: ResiliencePolicy,
}

impl StepRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn TaskStore>,
        wrapper: ResilienceWrapper,
        config: &EngineConfig,
    ) -> Self {
        Self {
            providers,
            store,
            wrapper,
            default_timeout: config.default_step_timeout(),
            default_policy: config.default_policy.clone(),
        }
    }

    /// Replaces the resilience wrapper.
    #[must_use]
    pub fn with_wrapper(mut self, wrapper: ResilienceWrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    /// Returns the resilience wrapper.
    #[must_use]
    pub fn wrapper(&self) -> &ResilienceWrapper {
        &self.wrapper
    }

    /// Returns the provider registry.
    #[must_use]
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Executes step `index` with `input`.
    ///
    /// A step failure is reported as [`StepOutcome::Failed`]. `Err` is
    /// reserved for failures to persist the step row.
    pub async fn execute_step(
        &self,
        ctx: &TaskContext,
        index: usize,
        definition: &StepDefinition,
        input: Value,
    ) -> Result<StepOutcome, TaskflowError> {
        let span = info_span!(
            "step",
            task_id = %ctx.task_id(),
            step_index = index,
            step_type = %definition.step_type,
            provider_ref = %definition.provider_ref,
        );
        self.run_step(ctx, index, definition, input).instrument(span).await
    }

    async fn run_step(
        &self,
        ctx: &TaskContext,
        index: usize,
        definition: &StepDefinition,
        input: Value,
    ) -> Result<StepOutcome, TaskflowError> {
        let mut row = TaskStep::pending(
            ctx.task_id(),
            index,
            &definition.step_type,
            &definition.provider_ref,
        );
        row.mark_processing(input.clone())?;
        self.store.save_step(&row).await?;
        ctx.try_emit_event(
            "step.started",
            Some(json!({
                "step_type": definition.step_type,
                "provider_ref": definition.provider_ref,
            })),
        );

        match self.invoke(ctx, definition, input).await {
            Ok(output) => {
                row.mark_completed(output.clone())?;
                self.store.save_step(&row).await?;
                info!(duration_ms = row.duration_ms(), "Step completed");
                ctx.try_emit_event(
                    "step.completed",
                    Some(json!({
                        "step_type": definition.step_type,
                        "duration_ms": row.duration_ms(),
                    })),
                );
                Ok(StepOutcome::Completed { output })
            }
            Err(error) => {
                row.mark_failed(error.to_string())?;
                self.store.save_step(&row).await?;
                warn!(error = %error, code = error.code(), "Step failed");
                ctx.try_emit_event(
                    "step.failed",
                    Some(json!({
                        "step_type": definition.step_type,
                        "error": error.to_dict(),
                    })),
                );
                Ok(StepOutcome::Failed { error })
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &TaskContext,
        definition: &StepDefinition,
        input: Value,
    ) -> Result<Value, TaskflowError> {
        let provider = self
            .providers
            .resolve(&definition.step_type, &definition.provider_ref)?;

        let policy = definition.policy(&self.default_policy);
        let mut options = CallOptions::new(definition.timeout(self.default_timeout))
            .with_retry(policy.retry)
            .with_circuit_breaker(policy.circuit_breaker);
        if let Some(spec) = &policy.fallback {
            options = options.with_fallback(self.build_fallback(spec, ctx)?);
        }

        let key = BreakerKey::new(&definition.step_type, &definition.provider_ref);
        let provider: &dyn Provider = provider.as_ref();
        self.wrapper
            .call(&key, &options, input, move |input| provider.execute(input, ctx))
            .await
    }

    fn build_fallback(
        &self,
        spec: &FallbackSpec,
        ctx: &TaskContext,
    ) -> Result<FallbackFn, ProviderResolutionError> {
        let fallback: FallbackFn = match spec.clone() {
            FallbackSpec::Static { value } => Arc::new(move |_: ProviderError, _: Value| {
                futures::future::ready(Ok::<_, ProviderError>(value.clone())).boxed()
            }),
            FallbackSpec::PassThrough => Arc::new(|_: ProviderError, input: Value| {
                futures::future::ready(Ok::<_, ProviderError>(input)).boxed()
            }),
            FallbackSpec::Provider {
                step_type,
                provider_ref,
            } => {
                let provider = self.providers.resolve(&step_type, &provider_ref)?;
                let ctx = ctx.clone();
                Arc::new(move |_: ProviderError, input: Value| {
                    let provider = Arc::clone(&provider);
                    let ctx = ctx.clone();
                    async move { provider.execute(input, &ctx).await }.boxed()
                })
            }
        };
        Ok(fallback)
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("providers", &self.providers)
            .field("wrapper", &self.wrapper)
            .field("default_timeout", &self.default_timeout)
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedState;
    use crate::core::{StepStatus, Task};
    use crate::events::CollectingEventSink;
    use crate::persistence::InMemoryTaskStore;
    use crate::resilience::RetryConfig;
    use crate::testing::ScriptedProvider;

    struct Fixture {
        runner: StepRunner,
        store: Arc<InMemoryTaskStore>,
        providers: Arc<ProviderRegistry>,
        sink: Arc<CollectingEventSink>,
        ctx: TaskContext,
    }

    async fn fixture(step_count: usize) -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("feature", json!({}));
        store.create_task(&task).await.unwrap();
        let rows: Vec<TaskStep> = (0..step_count)
            .map(|i| TaskStep::pending(task.id, i, "A", "default"))
            .collect();
        store.create_steps(task.id, &rows).await.unwrap();

        let providers = Arc::new(ProviderRegistry::new());
        let config = EngineConfig::default()
            .with_default_policy(ResiliencePolicy::default().with_retry(RetryConfig::no_retry()));
        let runner = StepRunner::new(
            providers.clone(),
            store.clone(),
            ResilienceWrapper::default(),
            &config,
        );
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = TaskContext::new(task.id, "feature", Arc::new(SharedState::new()), sink.clone());

        Fixture {
            runner,
            store,
            providers,
            sink,
            ctx,
        }
    }

    #[tokio::test]
    async fn test_completed_step_persists_output() {
        let f = fixture(1).await;
        f.providers
            .register("A", Arc::new(ScriptedProvider::returning(json!({"y": 2}))));

        let outcome = f
            .runner
            .execute_step(&f.ctx, 0, &StepDefinition::new("A"), json!({"x": 1}))
            .await
            .unwrap();

        assert!(outcome.is_completed());
        let row = &f.store.list_steps(f.ctx.task_id()).await.unwrap()[0];
        assert_eq!(row.status, StepStatus::Completed);
        assert_eq!(row.input, Some(json!({"x": 1})));
        assert_eq!(row.output, Some(json!({"y": 2})));
        assert!(row.started_at.is_some() && row.completed_at.is_some());
        assert_eq!(f.sink.event_types(), vec!["step.started", "step.completed"]);
    }

    #[tokio::test]
    async fn test_unresolved_provider_fails_step() {
        let f = fixture(1).await;

        let outcome = f
            .runner
            .execute_step(&f.ctx, 0, &StepDefinition::new("missing"), json!({}))
            .await
            .unwrap();

        let StepOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(error, TaskflowError::ProviderResolution(_)));
        let row = &f.store.list_steps(f.ctx.task_id()).await.unwrap()[0];
        assert_eq!(row.status, StepStatus::Failed);
        assert!(row.error_message.as_deref().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_static_fallback_completes_step() {
        let f = fixture(1).await;
        f.providers.register(
            "A",
            Arc::new(ScriptedProvider::failing(ProviderError::remote(Some(500), "down"))),
        );
        let definition = StepDefinition::new("A").with_fallback(FallbackSpec::Static {
            value: json!({"placeholder": true}),
        });

        let outcome = f
            .runner
            .execute_step(&f.ctx, 0, &definition, json!({}))
            .await
            .unwrap();

        let StepOutcome::Completed { output } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output, json!({"placeholder": true}));
    }

    #[tokio::test]
    async fn test_provider_fallback_uses_other_instance() {
        let f = fixture(1).await;
        f.providers.register(
            "A",
            Arc::new(ScriptedProvider::failing(ProviderError::timeout(10))),
        );
        f.providers.register_instance(
            "A",
            "backup",
            Arc::new(ScriptedProvider::returning(json!("from backup"))),
        );
        let definition = StepDefinition::new("A").with_fallback(FallbackSpec::Provider {
            step_type: "A".to_string(),
            provider_ref: "backup".to_string(),
        });

        let outcome = f
            .runner
            .execute_step(&f.ctx, 0, &definition, json!({}))
            .await
            .unwrap();

        assert!(matches!(outcome, StepOutcome::Completed { output } if output == json!("from backup")));
    }

    #[tokio::test]
    async fn test_missing_row_is_an_error() {
        let f = fixture(0).await;
        f.providers
            .register("A", Arc::new(ScriptedProvider::returning(json!({}))));

        let err = f
            .runner
            .execute_step(&f.ctx, 0, &StepDefinition::new("A"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskflowError::Persistence(_)));
    }
}
