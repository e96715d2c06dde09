//! Pipeline schemas: step definitions, resilience policies, and the store
//! resolving a feature to its schema.

mod definition;
mod store;

pub use definition::{
    FallbackSpec, PipelineSchema, ResiliencePolicy, StepDefinition, DEFAULT_PROVIDER_REF,
};
pub use store::{InMemorySchemaStore, SchemaStore};
