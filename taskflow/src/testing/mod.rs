//! Testing utilities for taskflow pipelines.
//!
//! This module provides:
//! - Scripted providers, a recording quota ledger and a fault-injecting store
//! - Assertions over tasks and step rows
//! - A pipeline harness wiring an engine over in-memory collaborators

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_step_statuses, assert_task_failed_at, assert_task_succeeded};
pub use fixtures::{HarnessRun, PipelineHarness, PipelineHarnessBuilder, HARNESS_FEATURE};
pub use mocks::{FailingTaskStore, RecordingLedger, ScriptedProvider};
