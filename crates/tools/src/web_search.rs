//! Web search tool: queries SerpAPI and returns organic results.
//!
//! Without an API key every invocation fails with an execution error; the
//! orchestrator records that as a tool failure and the model moves on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolstream_core::error::ToolError;
use toolstream_core::tool::{Tool, ToolResult};
use tracing::debug;

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

pub struct WebSearchTool {
    api_key: Option<String>,
    endpoint: String,
    engine: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, endpoint: impl Into<String>, engine: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            endpoint: endpoint.into(),
            engine: engine.into(),
            client,
        }
    }

    fn failure(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Use this tool to search the web."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| self.failure("SERPAPI_API_KEY is not configured"))?;

        debug!(query = %query, "Running web search");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("api_key", api_key), ("engine", &self.engine), ("q", query)])
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failure(format!("search API returned status {}", status.as_u16())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.failure(format!("unreadable search response: {e}")))?;

        let articles = parse_articles(&body).map_err(|e| self.failure(e))?;
        let output = serde_json::to_string_pretty(&articles).unwrap_or_default();
        let data = serde_json::to_value(&articles).unwrap_or_default();

        Ok(ToolResult::ok(output).with_data(data))
    }
}

/// Extract `organic_results` from a SerpAPI response body.
pub fn parse_articles(body: &serde_json::Value) -> Result<Vec<Article>, String> {
    if let Some(error) = body["error"].as_str() {
        return Err(format!("search API error: {error}"));
    }
    match body.get("organic_results") {
        Some(results) => serde_json::from_value(results.clone())
            .map_err(|e| format!("malformed organic_results: {e}")),
        None => Ok(Vec::new()),
    }
}
