//! Step providers.
//!
//! A provider is the unit of work a step executes. Providers are looked up
//! at run time by step type (and optionally provider reference) through the
//! [`ProviderRegistry`]. The [`ToolCallProvider`] is a complete provider
//! calling a remote tool with templated parameters.

#[cfg(feature = "http")]
mod http;
mod registry;
pub mod template;
mod tool_call;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::TaskContext;
use crate::errors::ProviderError;

#[cfg(feature = "http")]
pub use http::HttpToolClient;
pub use registry::ProviderRegistry;
pub use template::{resolve_str, resolve_template};
pub use tool_call::{ToolCallConfig, ToolCallProvider, ToolClient};

/// The execution contract of a step.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Executes the step against its input.
    ///
    /// Implementations may read and write the task's shared state through
    /// `ctx`. Failures must be reported through the [`ProviderError`]
    /// taxonomy so the resilience layer can classify them.
    async fn execute(&self, input: Value, ctx: &TaskContext) -> Result<Value, ProviderError>;
}
