//! Error types for the taskflow orchestration core.
//!
//! Provider failures are normalized into a small taxonomy so that the
//! resilience layer can decide what to retry and what counts against a
//! circuit breaker. Every error can be rendered as a dictionary for
//! structured reporting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::core::TransitionError;

/// The main error type for taskflow operations.
#[derive(Debug, Error)]
pub enum TaskflowError {
    /// The feature's pipeline schema could not be resolved.
    #[error("{0}")]
    SchemaResolution(#[from] SchemaResolutionError),

    /// No provider is registered for a step.
    #[error("{0}")]
    ProviderResolution(#[from] ProviderResolutionError),

    /// A provider invocation failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// The circuit breaker rejected the call.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// A persistence operation failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// A status transition violated the task/step state machine.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// The task cannot be executed in its current state.
    #[error("Task {task_id} cannot be executed: {reason}")]
    TaskRejected {
        /// The task id.
        task_id: Uuid,
        /// Why the task was rejected.
        reason: String,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskflowError {
    /// Returns true if the error is worth retrying at the provider level.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns a stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaResolution(_) => "schema_resolution_error",
            Self::ProviderResolution(_) => "provider_resolution_error",
            Self::Provider(_) => "provider_error",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Persistence(_) => "persistence_error",
            Self::Transition(_) => "invalid_transition",
            Self::TaskRejected { .. } => "task_rejected",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = match self {
            Self::Provider(err) => err.to_dict(),
            _ => HashMap::new(),
        };
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        if let Self::CircuitOpen(err) = self {
            map.insert("retry_after_ms".to_string(), serde_json::json!(err.retry_after_ms));
        }
        map
    }
}

/// Normalized failure kind reported for provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The invocation exceeded its time budget.
    Timeout,
    /// The remote endpoint answered with an error or could not be reached.
    RemoteError,
    /// The provider failed while executing.
    ExecutionFailed,
    /// The input was rejected before invocation.
    ValidationError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RemoteError => write!(f, "remote_error"),
            Self::ExecutionFailed => write!(f, "execution_failed"),
            Self::ValidationError => write!(f, "validation_error"),
        }
    }
}

/// Errors produced by a step provider.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderError {
    /// The call did not finish within its timeout.
    #[error("Timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The remote endpoint failed. `status` is absent for transport errors.
    #[error("Remote error{}: {detail}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Remote {
        /// HTTP-like status code, if any.
        status: Option<u16>,
        /// Detail returned by the endpoint or transport.
        detail: String,
    },

    /// The provider failed while executing.
    #[error("Execution failed: {message}")]
    Execution {
        /// The failure message.
        message: String,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// The input or configuration is invalid.
    #[error("Validation failed: {message}")]
    Validation {
        /// The validation message.
        message: String,
    },

    /// A parameter required by the target is absent.
    #[error("Missing required parameter: {parameter}")]
    MissingParameter {
        /// The missing parameter name.
        parameter: String,
    },
}

impl ProviderError {
    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a remote error.
    #[must_use]
    pub fn remote(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Remote {
            status,
            detail: detail.into(),
        }
    }

    /// Creates a non-retryable execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable execution error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a missing parameter error.
    #[must_use]
    pub fn missing_parameter(parameter: impl Into<String>) -> Self {
        Self::MissingParameter {
            parameter: parameter.into(),
        }
    }

    /// Returns the normalized kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Remote { .. } => ErrorKind::RemoteError,
            Self::Execution { .. } => ErrorKind::ExecutionFailed,
            Self::Validation { .. } | Self::MissingParameter { .. } => ErrorKind::ValidationError,
        }
    }

    /// Returns true for transient conditions: timeouts, transport errors,
    /// 5xx and 429 responses, and execution errors flagged retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Remote { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            Self::Execution { retryable, .. } => *retryable,
            Self::Validation { .. } | Self::MissingParameter { .. } => false,
        }
    }

    /// Returns true if the error reflects the caller's input rather than the
    /// health of the provider. Such errors do not count against a breaker.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::MissingParameter { .. } => true,
            Self::Remote {
                status: Some(code), ..
            } => (400..500).contains(code) && *code != 429,
            _ => false,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));

        match self {
            Self::Remote { status, detail } => {
                map.insert("status".to_string(), serde_json::json!(status));
                map.insert("detail".to_string(), serde_json::json!(detail));
            }
            Self::Timeout { timeout_ms } => {
                map.insert("timeout_ms".to_string(), serde_json::json!(timeout_ms));
            }
            Self::MissingParameter { parameter } => {
                map.insert("parameter".to_string(), serde_json::json!(parameter));
            }
            Self::Execution { .. } | Self::Validation { .. } => {}
        }

        map
    }
}

/// Errors returned by a remote tool endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The attempt exceeded its timeout.
    #[error("Tool call timed out after {timeout_ms}ms")]
    Timeout {
        /// The elapsed timeout.
        timeout_ms: u64,
    },

    /// The response could not be decoded.
    #[error("Invalid tool response: {0}")]
    InvalidResponse(String),

    /// The tool call is misconfigured.
    #[error("Tool configuration error: {0}")]
    Configuration(String),
}

impl ToolCallError {
    /// Returns true for network, timeout, 5xx and 429 failures.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_) | Self::Configuration(_) => false,
        }
    }
}

impl From<ToolCallError> for ProviderError {
    fn from(err: ToolCallError) -> Self {
        match err {
            ToolCallError::Network(detail) => Self::remote(None, detail),
            ToolCallError::Http { status, body } => Self::remote(Some(status), body),
            ToolCallError::Timeout { timeout_ms } => Self::timeout(timeout_ms),
            ToolCallError::InvalidResponse(message) => Self::execution(message),
            ToolCallError::Configuration(message) => Self::validation(message),
        }
    }
}

/// Errors raised while resolving a feature's pipeline schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaResolutionError {
    /// The feature has no pipeline schema reference.
    #[error("Feature '{feature_id}' has no pipeline schema reference")]
    NoSchemaReference {
        /// The feature id.
        feature_id: String,
    },

    /// The referenced schema does not exist.
    #[error("Pipeline schema '{pipeline_id}' not found for feature '{feature_id}'")]
    NotFound {
        /// The feature id.
        feature_id: String,
        /// The referenced pipeline id.
        pipeline_id: String,
    },

    /// The schema contains no steps.
    #[error("Pipeline schema '{pipeline_id}' has no steps")]
    EmptySchema {
        /// The pipeline id.
        pipeline_id: String,
    },

    /// The schema store itself failed.
    #[error("Schema store error: {0}")]
    Store(String),
}

/// Error raised when a step type cannot be mapped to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No provider registered for step type '{step_type}' (provider_ref: {provider_ref})")]
pub struct ProviderResolutionError {
    /// The step type.
    pub step_type: String,
    /// The provider reference.
    pub provider_ref: String,
}

impl ProviderResolutionError {
    /// Creates a new provider resolution error.
    #[must_use]
    pub fn new(step_type: impl Into<String>, provider_ref: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            provider_ref: provider_ref.into(),
        }
    }
}

/// Error raised when a circuit breaker rejects a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit open for {step_type}/{provider_ref}; retry after {retry_after_ms}ms")]
pub struct CircuitOpenError {
    /// The step type of the breaker key.
    pub step_type: String,
    /// The provider reference of the breaker key.
    pub provider_ref: String,
    /// Time until the breaker admits a trial call.
    pub retry_after_ms: u64,
}

/// Errors raised by task/step persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The task does not exist.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// The step row does not exist.
    #[error("Step {step_index} not found for task {task_id}")]
    StepNotFound {
        /// The task id.
        task_id: Uuid,
        /// The step index.
        step_index: usize,
    },

    /// A record already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend failed.
    #[error("Persistence backend error: {0}")]
    Backend(String),
}

/// Error returned by a quota ledger compensation call.
#[derive(Debug, Error)]
#[error("Compensation '{action}' failed for task {task_id}: {source}")]
pub struct CompensationError {
    /// The task id.
    pub task_id: Uuid,
    /// The attempted action (`confirm` or `cancel`).
    pub action: String,
    /// The ledger error.
    #[source]
    pub source: anyhow::Error,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is malformed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds an invalid value.
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv {
        /// The variable name.
        name: String,
        /// The offending value.
        value: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::timeout(100).is_retryable());
        assert!(ProviderError::remote(None, "connection reset").is_retryable());
        assert!(ProviderError::remote(Some(503), "unavailable").is_retryable());
        assert!(ProviderError::remote(Some(429), "slow down").is_retryable());
        assert!(!ProviderError::remote(Some(404), "missing").is_retryable());
        assert!(!ProviderError::validation("bad input").is_retryable());
        assert!(!ProviderError::missing_parameter("prompt").is_retryable());
        assert!(ProviderError::transient("busy").is_retryable());
        assert!(!ProviderError::execution("boom").is_retryable());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ProviderError::remote(Some(400), "bad").is_client_error());
        assert!(!ProviderError::remote(Some(429), "slow").is_client_error());
        assert!(!ProviderError::remote(Some(500), "oops").is_client_error());
        assert!(ProviderError::validation("x").is_client_error());
        assert!(!ProviderError::timeout(1).is_client_error());
    }

    #[test]
    fn test_tool_call_error_normalization() {
        assert!(ToolCallError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!ToolCallError::Http { status: 404, body: String::new() }.is_retryable());
        assert!(!ToolCallError::Configuration("x".into()).is_retryable());

        let err: ProviderError = ToolCallError::Http {
            status: 502,
            body: "upstream".into(),
        }
        .into();
        assert_eq!(err, ProviderError::remote(Some(502), "upstream"));

        let err: ProviderError = ToolCallError::Configuration("no tool name".into()).into();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_taskflow_error_to_dict() {
        let err = TaskflowError::from(CircuitOpenError {
            step_type: "llm".into(),
            provider_ref: "default".into(),
            retry_after_ms: 1500,
        });
        let dict = err.to_dict();
        assert_eq!(dict.get("code").unwrap(), "circuit_open");
        assert_eq!(dict.get("retry_after_ms").unwrap(), 1500);
        assert_eq!(dict.get("retryable").unwrap(), false);

        let err = TaskflowError::from(ProviderError::timeout(300));
        let dict = err.to_dict();
        assert_eq!(dict.get("code").unwrap(), "provider_error");
        assert_eq!(dict.get("kind").unwrap(), "timeout");
        assert_eq!(dict.get("timeout_ms").unwrap(), 300);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ProviderError::timeout(5).kind().to_string(), "timeout");
        assert_eq!(ProviderError::remote(Some(502), "x").kind().to_string(), "remote_error");
        assert_eq!(ProviderError::execution("x").kind().to_string(), "execution_failed");
    }

    #[test]
    fn test_provider_error_to_dict() {
        let err = ProviderError::remote(Some(502), "bad gateway");
        let dict = err.to_dict();

        assert_eq!(dict.get("kind").unwrap(), "remote_error");
        assert_eq!(dict.get("status").unwrap(), 502);
        assert_eq!(dict.get("retryable").unwrap(), true);
    }

    #[test]
    fn test_remote_error_message() {
        assert_eq!(
            ProviderError::remote(Some(503), "down").to_string(),
            "Remote error (status 503): down"
        );
        assert_eq!(
            ProviderError::remote(None, "refused").to_string(),
            "Remote error: refused"
        );
    }

    #[test]
    fn test_taskflow_error_retryable() {
        let err: TaskflowError = ProviderError::timeout(10).into();
        assert!(err.is_retryable());

        let err: TaskflowError = ProviderResolutionError::new("llm", "default").into();
        assert!(!err.is_retryable());
    }
}
