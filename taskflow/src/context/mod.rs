//! Context management for task execution.
//!
//! This module provides:
//! - Shared mutable flow state visible to every step of a task
//! - The per-step context handed to providers

mod state;
mod task_context;

pub use state::SharedState;
pub use task_context::TaskContext;
