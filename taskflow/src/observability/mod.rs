//! Observability: log subscriber setup.
//!
//! Lifecycle events go through [`crate::events`]; breaker statistics are read
//! from [`crate::resilience::CircuitBreakerHandle::snapshot`].

mod logging;

pub use logging::init_tracing;
