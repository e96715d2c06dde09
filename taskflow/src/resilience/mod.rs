//! Resilience policies guarding provider invocations.
//!
//! This module provides:
//! - Retry configuration with fixed, linear and exponential backoff
//! - A three-state circuit breaker and its per-provider actor
//! - The wrapper combining both with per-attempt timeouts and fallbacks

mod breaker;
mod circuit_breaker;
mod retry;
mod wrapper;

pub use breaker::{
    BreakerKey, BreakerPermit, CircuitBreakerHandle, CircuitBreakerRegistry, DEFAULT_MAILBOX_CAPACITY,
};
pub use circuit_breaker::{
    Admission, CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    Permit, StateChange,
};
pub use retry::{retry_with, BackoffStrategy, JitterStrategy, RetryConfig};
pub use wrapper::{CallOptions, FallbackFn, ResilienceWrapper};
