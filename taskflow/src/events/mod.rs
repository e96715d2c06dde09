//! Event sink system for observability.
//!
//! Lifecycle events complement `tracing` logs: logs are for operators,
//! events are structured payloads an application can forward elsewhere.

mod sink;

pub use sink::{CollectingEventSink, Event, EventSink, LoggingEventSink, NoOpEventSink};
