//! Resilience wrapper: circuit breaker, retry, timeout and fallback around
//! one provider invocation.

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::breaker::{BreakerKey, CircuitBreakerRegistry};
use super::circuit_breaker::{CallOutcome, CircuitBreakerConfig, CircuitState};
use super::retry::RetryConfig;
use crate::errors::{ProviderError, TaskflowError};
use crate::utils::duration_ms;

/// Fallback invoked with the last error and the original input once every
/// attempt has failed.
pub type FallbackFn =
    Arc<dyn Fn(ProviderError, Value) -> BoxFuture<'static, Result<Value, ProviderError>> + Send + Sync>;

/// Per-call resilience settings.
#[derive(Clone)]
pub struct CallOptions {
    /// Hard timeout of each attempt.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Circuit breaker policy, used when the breaker is first created.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Optional fallback.
    pub fallback: Option<FallbackFn>,
}

impl CallOptions {
    /// Creates options with the given timeout and default policies.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            fallback: None,
        }
    }

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
    pub fn with_fallback(mut self, fallback: FallbackFn) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Guards provider invocations with the shared breakers.
#[derive(Debug, Clone, Default)]
pub struct ResilienceWrapper {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ResilienceWrapper {
    /// Creates a wrapper over a breaker registry.
    #[must_use]
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }

    /// Returns the breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Runs `operation` under the breaker for `key`.
    ///
    /// The breaker sees one outcome per call: the result of the whole retry
    /// sequence, recorded before any fallback runs. Half-open trial permits
    /// get a single attempt. If the returned future is dropped mid-call the
    /// permit is released without an outcome.
    pub async fn call<F, Fut>(
        &self,
        key: &BreakerKey,
        options: &CallOptions,
        input: Value,
        operation: F,
    ) -> Result<Value, TaskflowError>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<Value, ProviderError>>,
    {
        let breaker = self.breakers.get_or_create(key, &options.circuit_breaker);
        let permit = breaker.acquire().await?;

        let max_retries = if permit.is_trial() {
            0
        } else {
            options.retry.max_retries
        };
        let timeout_ms = duration_ms(options.timeout);
        let mut attempt = 0;

        let last_error = loop {
            let result = match tokio::time::timeout(options.timeout, operation(input.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(timeout_ms)),
            };

            let error = match result {
                Ok(output) => {
                    permit.record(CallOutcome::Success).await;
                    return Ok(output);
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= max_retries {
                break error;
            }

            let delay = options.retry.delay_for(attempt);
            debug!(
                breaker = %key,
                attempt = attempt + 1,
                delay_ms = duration_ms(delay),
                error = %error,
                "Retrying provider call"
            );
            tokio::time::sleep(delay).await;

            if breaker.state().await == Some(CircuitState::Open) {
                debug!(breaker = %key, "Circuit opened during backoff; abandoning retries");
                break error;
            }
            attempt += 1;
        };

        let outcome = if last_error.is_client_error() {
            CallOutcome::Ignored
        } else {
            CallOutcome::Failure
        };
        permit.record(outcome).await;

        match &options.fallback {
            Some(fallback) => {
                warn!(
                    breaker = %key,
                    attempts = attempt + 1,
                    error = %last_error,
                    "Provider call failed; invoking fallback"
                );
                Ok(fallback(last_error, input).await?)
            }
            None => Err(last_error.into()),
        }
    }
}
