//! Pipeline execution.
//!
//! This module provides:
//! - The step runner applying resilience policies to one provider call
//! - The engine driving a task through its feature's steps in order

mod engine;
mod runner;


pub use engine::{PipelineEngine, PipelineReport};
pub use runner::{StepOutcome, StepRunner};
