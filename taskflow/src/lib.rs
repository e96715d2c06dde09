//! # Taskflow
//!
//! Runs a feature's pipeline for a task: an ordered list of provider-backed
//! steps, each guarded by a circuit breaker, retries, a timeout and an
//! optional fallback.
//!
//! - **Schemas**: a feature resolves to a pipeline schema of typed steps
//! - **Providers**: step types map to providers, optionally per instance
//! - **Resilience**: one circuit breaker per step type and provider instance
//! - **Persistence**: every task and step status change is stored
//! - **Saga compensation**: the task's quota reservation is confirmed on
//!   success and cancelled on failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskflow::prelude::*;
//!
//! let schemas = InMemorySchemaStore::new().with_pipeline(
//!     "summarize",
//!     PipelineSchema::new("summarize-v1", vec![StepDefinition::new("llm")]),
//! );
//! let providers = ProviderRegistry::new().with_provider("llm", Arc::new(MyLlm));
//!
//! let engine = PipelineEngine::new(
//!     &EngineConfig::from_env()?,
//!     Arc::new(schemas),
//!     Arc::new(providers),
//!     Arc::new(InMemoryTaskStore::new()),
//!     Arc::new(MyLedger),
//! );
//!
//! let task = engine.submit("summarize", json!({"text": "..."})).await?;
//! let report = engine.execute_task(task.id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod providers;
pub mod resilience;
pub mod saga;
pub mod schema;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, LogFormat, LoggingConfig};
    pub use crate::context::{SharedState, TaskContext};
    pub use crate::core::{StepStatus, Task, TaskStatus, TaskStep};
    pub use crate::errors::{
        CircuitOpenError, PersistenceError, ProviderError, ProviderResolutionError,
        SchemaResolutionError, TaskflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_tracing;
    pub use crate::persistence::{InMemoryTaskStore, TaskStore};
    pub use crate::pipeline::{PipelineEngine, PipelineReport, StepOutcome, StepRunner};
    pub use crate::providers::{Provider, ProviderRegistry, ToolCallConfig, ToolCallProvider, ToolClient};
    pub use crate::resilience::{
        BackoffStrategy, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
        JitterStrategy, ResilienceWrapper, RetryConfig,
    };
    pub use crate::saga::{CompensationAction, CompensationReport, Outcome, QuotaLedger, SagaCompensator};
    pub use crate::schema::{
        FallbackSpec, InMemorySchemaStore, PipelineSchema, ResiliencePolicy, SchemaStore,
        StepDefinition,
    };
    pub use crate::utils::Timestamp;
}
