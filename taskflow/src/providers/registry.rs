//! Registry mapping step types to provider instances.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Provider;
use crate::context::TaskContext;
use crate::errors::{ProviderResolutionError, TaskflowError};

/// Registry of providers.
///
/// A provider registered with [`register_instance`](Self::register_instance)
/// serves exactly one `(step_type, provider_ref)` pair. A provider
/// registered with [`register`](Self::register) is the default for its step
/// type and serves every reference without a dedicated instance.
#[derive(Default)]
pub struct ProviderRegistry {
    defaults: RwLock<HashMap<String, Arc<dyn Provider>>>,
    instances: RwLock<HashMap<(String, String), Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the default provider of a step type.
    pub fn register(&self, step_type: impl Into<String>, provider: Arc<dyn Provider>) {
        let step_type = step_type.into();
        tracing::debug!(step_type = %step_type, "Registered provider");
        self.defaults.write().insert(step_type, provider);
    }

    /// Registers a provider for one `(step_type, provider_ref)` pair.
    pub fn register_instance(
        &self,
        step_type: impl Into<String>,
        provider_ref: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) {
        let key = (step_type.into(), provider_ref.into());
        tracing::debug!(step_type = %key.0, provider_ref = %key.1, "Registered provider instance");
        self.instances.write().insert(key, provider);
    }

    /// Registers a default provider and returns the registry.
    #[must_use]
    pub fn with_provider(self, step_type: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(step_type, provider);
        self
    }

    /// Resolves the provider for a step.
    pub fn resolve(
        &self,
        step_type: &str,
        provider_ref: &str,
    ) -> Result<Arc<dyn Provider>, ProviderResolutionError> {
        if let Some(provider) = self
            .instances
            .read()
            .get(&(step_type.to_string(), provider_ref.to_string()))
        {
            return Ok(Arc::clone(provider));
        }

        self.defaults
            .read()
            .get(step_type)
            .cloned()
            .ok_or_else(|| ProviderResolutionError::new(step_type, provider_ref))
    }

    /// Returns true if any provider serves the step type.
    #[must_use]
    pub fn is_registered(&self, step_type: &str) -> bool {
        self.defaults.read().contains_key(step_type)
            || self.instances.read().keys().any(|(t, _)| t == step_type)
    }

    /// Returns the registered step types, sorted.
    #[must_use]
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.defaults.read().keys().cloned().collect();
        for (step_type, _) in self.instances.read().keys() {
            if !types.contains(step_type) {
                types.push(step_type.clone());
            }
        }
        types.sort();
        types
    }

    /// Resolves and runs a provider without any resilience policy.
    pub async fn execute(
        &self,
        step_type: &str,
        provider_ref: &str,
        input: Value,
        ctx: &TaskContext,
    ) -> Result<Value, TaskflowError> {
        let provider = self.resolve(step_type, provider_ref)?;
        Ok(provider.execute(input, ctx).await?)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedState;
    use crate::errors::ProviderError;
    use crate::events::NoOpEventSink;
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    struct Tagged(&'static str);

    #[async_trait]
    impl Provider for Tagged {
        async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value, ProviderError> {
            Ok(json!({"by": self.0, "input": input}))
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(
            Uuid::new_v4(),
            "feature",
            Arc::new(SharedState::new()),
            Arc::new(NoOpEventSink),
        )
    }

    #[tokio::test]
    async fn test_instance_takes_precedence_over_default() {
        let registry = ProviderRegistry::new();
        registry.register("image", Arc::new(Tagged("default")));
        registry.register_instance("image", "sdxl", Arc::new(Tagged("sdxl")));

        let out = registry.execute("image", "sdxl", json!(1), &ctx()).await.unwrap();
        assert_eq!(out["by"], "sdxl");

        let out = registry.execute("image", "other", json!(1), &ctx()).await.unwrap();
        assert_eq!(out["by"], "default");
    }

    #[test]
    fn test_unknown_type_fails_fast() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("video", "default").err().unwrap();
        assert_eq!(err, ProviderResolutionError::new("video", "default"));
    }

    #[test]
    fn test_instance_only_type() {
        let registry = ProviderRegistry::new();
        registry.register_instance("tts", "eleven", Arc::new(Tagged("eleven")));

        assert!(registry.is_registered("tts"));
        assert!(registry.resolve("tts", "eleven").is_ok());
        assert!(registry.resolve("tts", "default").is_err());
    }

    #[test]
    fn test_step_types_sorted_and_deduplicated() {
        let registry = ProviderRegistry::new()
            .with_provider("llm", Arc::new(Tagged("a")))
            .with_provider("image", Arc::new(Tagged("b")));
        registry.register_instance("llm", "gpt", Arc::new(Tagged("c")));

        assert_eq!(registry.step_types(), vec!["image".to_string(), "llm".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_maps_resolution_error() {
        let registry = ProviderRegistry::new();
        let err = registry.execute("nope", "default", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, TaskflowError::ProviderResolution(_)));
    }
}
