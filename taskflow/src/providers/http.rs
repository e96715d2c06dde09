//! HTTP implementation of [`ToolClient`].

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::tool_call::ToolClient;
use crate::errors::ToolCallError;

/// Tool client speaking JSON over HTTP.
///
/// Calls go to `POST {base_url}/tools/{name}/call` with the parameters as
/// the body; schemas come from `GET {base_url}/tools/{name}/schema`.
#[derive(Debug, Clone)]
pub struct HttpToolClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpToolClient {
    /// Creates a client for a base URL.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolCallError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Sends a bearer token with every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn url(&self, tool_name: &str, action: &str) -> String {
        format!("{}/tools/{}/{}", self.base_url, tool_name, action)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolCallError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ToolCallError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolCallError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ToolCallError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    async fn call_tool(&self, tool_name: &str, parameters: &Value) -> Result<Value, ToolCallError> {
        let body = self
            .send(self.client.post(self.url(tool_name, "call")).json(parameters))
            .await?;

        Ok(match body {
            Value::Object(mut map) if map.contains_key("result") => {
                map.remove("result").unwrap_or(Value::Null)
            }
            other => other,
        })
    }

    async fn required_parameters(&self, tool_name: &str) -> Result<Vec<String>, ToolCallError> {
        let schema = self.send(self.client.get(self.url(tool_name, "schema"))).await?;
        Ok(required_from_schema(&schema))
    }
}

/// Extracts required parameter names from a tool schema.
///
/// Accepts `{"required": [...]}` at the top level or nested under
/// `parameters` / `input_schema`.
fn required_from_schema(schema: &Value) -> Vec<String> {
    ["/required", "/parameters/required", "/input_schema/required"]
        .iter()
        .find_map(|pointer| schema.pointer(pointer).and_then(Value::as_array))
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
