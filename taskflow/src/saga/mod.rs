//! Saga compensation against the quota ledger.
//!
//! The quota reservation is made before the pipeline runs. Once the
//! pipeline reaches a terminal outcome the reservation is either confirmed
//! or cancelled. A ledger failure is reported but never changes the task's
//! terminal status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::CompensationError;
use crate::events::{EventSink, NoOpEventSink};

/// Compensating operations of the resource-quota ledger.
///
/// Both operations must be idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Commits the reservation held for a task.
    async fn confirm(&self, task_id: Uuid) -> anyhow::Result<()>;

    /// Releases the reservation held for a task.
    async fn cancel(&self, task_id: Uuid) -> anyhow::Result<()>;
}

/// Terminal outcome of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every step completed.
    Success,
    /// The pipeline failed.
    Failure,
}

/// Ledger operation triggered by an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationAction {
    /// `confirm`
    Confirm,
    /// `cancel`
    Cancel,
}

impl From<Outcome> for CompensationAction {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Self::Confirm,
            Outcome::Failure => Self::Cancel,
        }
    }
}

impl fmt::Display for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirm => write!(f, "confirm"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// What a compensation attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationReport {
    /// The task id.
    pub task_id: Uuid,
    /// The attempted ledger operation.
    pub action: CompensationAction,
    /// Whether the ledger accepted it.
    pub succeeded: bool,
    /// The ledger error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the compensating ledger call for a finished pipeline.
#[derive(Clone)]
pub struct SagaCompensator {
    ledger: Arc<dyn QuotaLedger>,
    event_sink: Arc<dyn EventSink>,
}

impl SagaCompensator {
    /// Creates a compensator.
    #[must_use]
    pub fn new(ledger: Arc<dyn QuotaLedger>) -> Self {
        Self {
            ledger,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink receiving `compensation.failed` events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Confirms on success, cancels on failure. Never fails.
    pub async fn compensate(&self, task_id: Uuid, outcome: Outcome) -> CompensationReport {
        let action = CompensationAction::from(outcome);
        let result = match action {
            CompensationAction::Confirm => self.ledger.confirm(task_id).await,
            CompensationAction::Cancel => self.ledger.cancel(task_id).await,
        };

        match result {
            Ok(()) => {
                info!(task_id = %task_id, action = %action, "Quota compensation applied");
                CompensationReport {
                    task_id,
                    action,
                    succeeded: true,
                    error: None,
                }
            }
            Err(source) => {
                let err = CompensationError {
                    task_id,
                    action: action.to_string(),
                    source,
                };
                error!(task_id = %task_id, action = %action, error = %err, "Quota compensation failed");
                self.event_sink.try_emit(
                    "compensation.failed",
                    Some(serde_json::json!({
                        "task_id": task_id,
                        "action": action,
                        "error": err.to_string(),
                    })),
                );
                CompensationReport {
                    task_id,
                    action,
                    succeeded: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

impl fmt::Debug for SagaCompensator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaCompensator").finish_non_exhaustive()
    }
}
