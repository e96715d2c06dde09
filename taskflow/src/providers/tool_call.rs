//! Provider invoking a remote tool endpoint with templated parameters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::template::resolve_template;
use super::Provider;
use crate::context::TaskContext;
use crate::errors::{ProviderError, ToolCallError};
use crate::resilience::{retry_with, BackoffStrategy, RetryConfig};
use crate::utils::duration_ms;

/// Client of a remote tool endpoint.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Invokes a tool with resolved parameters.
    async fn call_tool(&self, tool_name: &str, parameters: &Value) -> Result<Value, ToolCallError>;

    /// Returns the names of the tool's required parameters.
    async fn required_parameters(&self, tool_name: &str) -> Result<Vec<String>, ToolCallError>;
}

fn default_tool_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_retries(2)
        .with_base_delay_ms(500)
        .with_backoff(BackoffStrategy::Linear)
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

/// Configuration of a [`ToolCallProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallConfig {
    /// Name of the remote tool.
    pub tool_name: String,
    /// Parameter template; string fields may contain `{{path}}` placeholders.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// State key receiving the result. Defaults to the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    /// Check required parameters before calling.
    #[serde(default)]
    pub validate_schema: bool,
    /// Internal retry budget, linear backoff by default.
    #[serde(default = "default_tool_retry")]
    pub retry: RetryConfig,
    /// Timeout of a single call in milliseconds.
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
}

impl ToolCallConfig {
    /// Creates a config for a tool.
    #[must_use]
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters: Map::new(),
            output_key: None,
            validate_schema: false,
            retry: default_tool_retry(),
            timeout_ms: default_tool_timeout_ms(),
        }
    }

    /// Adds a parameter template entry.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, template: Value) -> Self {
        self.parameters.insert(name.into(), template);
        self
    }

    /// Sets the output key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Enables required-parameter validation.
    #[must_use]
    pub fn with_schema_validation(mut self) -> Self {
        self.validate_schema = true;
        self
    }

    /// Sets the internal retry budget.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Returns the state key receiving the result.
    #[must_use]
    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.tool_name)
    }
}

/// Provider calling a remote tool.
///
/// The step input (when it is an object) forms the base of the call
/// parameters; configured parameter templates are resolved against the
/// task's shared state and layered on top.
pub struct ToolCallProvider {
    config: ToolCallConfig,
    client: Arc<dyn ToolClient>,
}

impl ToolCallProvider {
    /// Creates a tool call provider.
    #[must_use]
    pub fn new(config: ToolCallConfig, client: Arc<dyn ToolClient>) -> Self {
        Self { config, client }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ToolCallConfig {
        &self.config
    }

    fn build_parameters(&self, input: &Value, ctx: &TaskContext) -> Result<Map<String, Value>, ProviderError> {
        if self.config.tool_name.trim().is_empty() {
            return Err(ToolCallError::Configuration("tool_name is empty".to_string()).into());
        }

        let mut parameters = match input {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let template = Value::Object(self.config.parameters.clone());
        if let Value::Object(resolved) = resolve_template(&template, ctx.state()) {
            parameters.extend(resolved);
        }
        Ok(parameters)
    }

    async fn check_required(&self, parameters: &Map<String, Value>) -> Result<(), ProviderError> {
        let required = self.client.required_parameters(&self.config.tool_name).await?;
        match required
            .into_iter()
            .find(|name| parameters.get(name).map_or(true, Value::is_null))
        {
            Some(missing) => Err(ProviderError::missing_parameter(missing)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ToolCallProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for ToolCallProvider {
    async fn execute(&self, input: Value, ctx: &TaskContext) -> Result<Value, ProviderError> {
        let tool_name = self.config.tool_name.as_str();
        let parameters = self.build_parameters(&input, ctx)?;

        if self.config.validate_schema {
            self.check_required(&parameters).await?;
        }

        let parameters = Value::Object(parameters);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        debug!(
            task_id = %ctx.task_id(),
            step_index = ctx.step_index(),
            tool = tool_name,
            "Calling tool"
        );

        let client = &self.client;
        let params = &parameters;
        let result = retry_with(&self.config.retry, tool_name, ToolCallError::is_retryable, |_| async move {
            match tokio::time::timeout(timeout, client.call_tool(tool_name, params)).await {
                Ok(result) => result,
                Err(_) => Err(ToolCallError::Timeout {
                    timeout_ms: duration_ms(timeout),
                }),
            }
        })
        .await?;

        ctx.state().set(self.config.output_key(), result.clone());
        info!(
            task_id = %ctx.task_id(),
            step_index = ctx.step_index(),
            tool = tool_name,
            output_key = self.config.output_key(),
            "Tool call completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedState;
    use crate::events::NoOpEventSink;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeToolClient {
        responses: Mutex<VecDeque<Result<Value, ToolCallError>>>,
        required: Vec<String>,
        calls: Mutex<Vec<Value>>,
    }

    impl FakeToolClient {
        fn with_responses(responses: Vec<Result<Value, ToolCallError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ToolClient for FakeToolClient {
        async fn call_tool(&self, _tool_name: &str, parameters: &Value) -> Result<Value, ToolCallError> {
            self.calls.lock().push(parameters.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"ok": true})))
        }

        async fn required_parameters(&self, _tool_name: &str) -> Result<Vec<String>, ToolCallError> {
            Ok(self.required.clone())
        }
    }

    fn ctx_with(state: SharedState) -> TaskContext {
        TaskContext::new(Uuid::new_v4(), "feature", Arc::new(state), Arc::new(NoOpEventSink))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(2)
            .with_base_delay_ms(5)
            .with_backoff(BackoffStrategy::Linear)
    }

    #[tokio::test]
    async fn test_resolves_templates_and_merges_result() {
        let state = SharedState::new();
        state.set("user", json!({"name": "张三"}));
        let ctx = ctx_with(state);

        let client = Arc::new(FakeToolClient::with_responses(vec![Ok(json!({"items": [1, 2]}))]));
        let provider = ToolCallProvider::new(
            ToolCallConfig::new("search").with_parameter("query", json!("news about {{user.name}}")),
            client.clone(),
        );

        let output = provider.execute(json!({"limit": 5}), &ctx).await.unwrap();

        assert_eq!(output, json!({"items": [1, 2]}));
        assert_eq!(
            client.calls.lock()[0],
            json!({"limit": 5, "query": "news about 张三"})
        );
        assert_eq!(ctx.state().get("search"), Some(json!({"items": [1, 2]})));
    }

    #[tokio::test]
    async fn test_custom_output_key() {
        let ctx = ctx_with(SharedState::new());
        let provider = ToolCallProvider::new(
            ToolCallConfig::new("weather").with_output_key("forecast"),
            Arc::new(FakeToolClient::default()),
        );

        provider.execute(json!({}), &ctx).await.unwrap();
        assert!(ctx.state().contains_key("forecast"));
        assert!(!ctx.state().contains_key("weather"));
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let ctx = ctx_with(SharedState::new());
        let client = Arc::new(FakeToolClient {
            required: vec!["query".to_string(), "lang".to_string()],
            ..FakeToolClient::default()
        });
        let provider = ToolCallProvider::new(
            ToolCallConfig::new("search")
                .with_parameter("query", json!("{{absent}}"))
                .with_schema_validation(),
            client.clone(),
        );

        let err = provider.execute(json!({}), &ctx).await.unwrap_err();

        assert_eq!(err, ProviderError::missing_parameter("lang"));
        assert!(client.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors() {
        let ctx = ctx_with(SharedState::new());
        let client = Arc::new(FakeToolClient::with_responses(vec![
            Err(ToolCallError::Http {
                status: 503,
                body: "busy".into(),
            }),
            Err(ToolCallError::Network("reset".into())),
            Ok(json!("done")),
        ]));
        let provider = ToolCallProvider::new(
            ToolCallConfig::new("render").with_retry(fast_retry()),
            client.clone(),
        );

        let output = provider.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(output, json!("done"));
        assert_eq!(client.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let ctx = ctx_with(SharedState::new());
        let client = Arc::new(FakeToolClient::with_responses(vec![Err(ToolCallError::Http {
            status: 422,
            body: "bad params".into(),
        })]));
        let provider = ToolCallProvider::new(
            ToolCallConfig::new("render").with_retry(fast_retry()),
            client.clone(),
        );

        let err = provider.execute(json!({}), &ctx).await.unwrap_err();
        assert_eq!(err, ProviderError::remote(Some(422), "bad params"));
        assert_eq!(client.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_tool_name_is_validation_error() {
        let ctx = ctx_with(SharedState::new());
        let provider = ToolCallProvider::new(ToolCallConfig::new("  "), Arc::new(FakeToolClient::default()));

        let err = provider.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation { .. }));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ToolCallConfig =
            serde_json::from_value(json!({"tool_name": "ocr", "parameters": {"url": "{{image}}"}}))
                .unwrap();
        assert_eq!(config.output_key(), "ocr");
        assert_eq!(config.retry.backoff, BackoffStrategy::Linear);
        assert_eq!(config.timeout_ms, 30_000);
        assert!(!config.validate_schema);
    }
}
