//! Core domain model types for taskflow.
//!
//! This module contains the records the engine mutates:
//! - Task and step status enums with their transition rules
//! - The `Task` and `TaskStep` persistence records

mod status;
mod task;

pub use status::{StepStatus, TaskStatus, TransitionError};
pub use task::{Task, TaskStep, PIPELINE_LEVEL_INDEX};
