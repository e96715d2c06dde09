//! Pipeline schema and step definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::errors::SchemaResolutionError;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Provider reference used when a step names none.
pub const DEFAULT_PROVIDER_REF: &str = "default";

fn default_provider_ref() -> String {
    DEFAULT_PROVIDER_REF.to_string()
}

/// What a step produces when its provider keeps failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackSpec {
    /// Return a fixed value.
    Static {
        /// The value to return.
        value: Value,
    },
    /// Return the step input unchanged.
    PassThrough,
    /// Invoke another registered provider with the step input.
    Provider {
        /// Step type of the fallback provider.
        step_type: String,
        /// Provider reference of the fallback provider.
        #[serde(default = "default_provider_ref")]
        provider_ref: String,
    },
}

/// Resilience policy applied around a provider call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencePolicy {
    /// Retry policy.
    pub retry: RetryConfig,
    /// Circuit breaker policy.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Optional fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackSpec>,
}

impl ResiliencePolicy {
    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker policy.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Sets the fallback.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackSpec) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

/// One entry of a pipeline schema.
///
/// Omitted timeout and policy fields inherit the engine defaults, see
/// [`StepDefinition::policy`] and [`StepDefinition::timeout`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step type, mapped to a provider by the registry.
    #[serde(rename = "type", alias = "step_type")]
    pub step_type: String,
    /// Provider instance reference.
    #[serde(default = "default_provider_ref")]
    pub provider_ref: String,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Circuit breaker override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Fallback override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackSpec>,
}

impl StepDefinition {
    /// Creates a step definition using the default provider.
    #[must_use]
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            provider_ref: default_provider_ref(),
            timeout_ms: None,
            retry: None,
            circuit_breaker: None,
            fallback: None,
        }
    }

    /// Sets the provider reference.
    #[must_use]
    pub fn with_provider_ref(mut self, provider_ref: impl Into<String>) -> Self {
        self.provider_ref = provider_ref.into();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the circuit breaker policy.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Sets the fallback.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackSpec) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the effective policy, filling gaps from `defaults`.
    #[must_use]
    pub fn policy(&self, defaults: &ResiliencePolicy) -> ResiliencePolicy {
        ResiliencePolicy {
            retry: self.retry.clone().unwrap_or_else(|| defaults.retry.clone()),
            circuit_breaker: self
                .circuit_breaker
                .clone()
                .unwrap_or_else(|| defaults.circuit_breaker.clone()),
            fallback: self.fallback.clone().or_else(|| defaults.fallback.clone()),
        }
    }

    /// Returns the effective per-attempt timeout.
    #[must_use]
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map_or(default, Duration::from_millis)
    }
}

/// Ordered, immutable list of steps of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSchema {
    /// Schema identifier.
    pub pipeline_id: String,
    /// Steps in execution order.
    pub steps: Vec<StepDefinition>,
}

impl PipelineSchema {
    /// Creates a schema.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            steps,
        }
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the schema has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Rejects schemas without steps.
    pub fn validate(&self) -> Result<(), SchemaResolutionError> {
        if self.steps.is_empty() {
            return Err(SchemaResolutionError::EmptySchema {
                pipeline_id: self.pipeline_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BackoffStrategy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_step_definition_from_json() {
        let step: StepDefinition = serde_json::from_value(json!({
            "type": "image_generation",
            "timeout_ms": 5000,
            "retry": {"max_retries": 4, "backoff": "linear"},
            "fallback": {"kind": "static", "value": {"url": null}}
        }))
        .unwrap();

        assert_eq!(step.step_type, "image_generation");
        assert_eq!(step.provider_ref, DEFAULT_PROVIDER_REF);
        assert_eq!(step.timeout_ms, Some(5000));
        let retry = step.retry.as_ref().unwrap();
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.backoff, BackoffStrategy::Linear);
        assert_eq!(
            step.fallback,
            Some(FallbackSpec::Static {
                value: json!({"url": null})
            })
        );
    }

    #[test]
    fn test_step_type_alias() {
        let step: StepDefinition =
            serde_json::from_value(json!({"step_type": "llm", "provider_ref": "gpt"})).unwrap();
        assert_eq!(step.step_type, "llm");
        assert_eq!(step.provider_ref, "gpt");
    }

    #[test]
    fn test_policy_inherits_defaults() {
        let defaults = ResiliencePolicy::default()
            .with_retry(RetryConfig::new().with_max_retries(7))
            .with_fallback(FallbackSpec::PassThrough);

        let plain = StepDefinition::new("llm");
        let policy = plain.policy(&defaults);
        assert_eq!(policy.retry.max_retries, 7);
        assert_eq!(policy.fallback, Some(FallbackSpec::PassThrough));

        let custom = StepDefinition::new("llm").with_retry(RetryConfig::no_retry());
        assert_eq!(custom.policy(&defaults).retry.max_retries, 0);
    }

    #[test]
    fn test_timeout_override() {
        let default = Duration::from_secs(30);
        assert_eq!(StepDefinition::new("a").timeout(default), default);
        assert_eq!(
            StepDefinition::new("a").with_timeout_ms(250).timeout(default),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_empty_schema_is_invalid() {
        let schema = PipelineSchema::new("empty", vec![]);
        assert!(schema.is_empty());
        assert_eq!(
            schema.validate(),
            Err(SchemaResolutionError::EmptySchema {
                pipeline_id: "empty".to_string()
            })
        );
        assert!(PipelineSchema::new("one", vec![StepDefinition::new("a")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_provider_fallback_default_ref() {
        let spec: FallbackSpec =
            serde_json::from_value(json!({"kind": "provider", "step_type": "llm"})).unwrap();
        assert_eq!(
            spec,
            FallbackSpec::Provider {
                step_type: "llm".to_string(),
                provider_ref: "default".to_string()
            }
        );
    }
}
