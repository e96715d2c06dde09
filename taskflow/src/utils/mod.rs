//! Utility functions for timestamps.

pub mod timestamps;

pub use timestamps::{duration_ms, now_utc, Timestamp};
