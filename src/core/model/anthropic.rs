use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ContentBlock, ModelClient, ModelRequest, ModelResponse, StopReason, ToolSpec, Usage};
use crate::core::config::ModelConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ── Messages API request/response ──

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolSpec],
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

// ── Anthropic client ──

#[derive(Debug)]
pub struct AnthropicClient {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl AnthropicClient {
    /// Reads the API key from the environment variable named in config.
    /// A missing key fails construction, not the eventual request.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("Missing API key in ${}", config.api_key_env))?;
        Ok(Self {
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            api_key,
            client: Client::new(),
        })
    }

    fn build_request<'a>(request: &ModelRequest<'a>) -> MessagesRequest<'a> {
        MessagesRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: request.messages,
            tools: request.tools,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn create_message(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        let body = Self::build_request(&request);

        let res = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(anyhow!(
                "Anthropic API Error: {}",
                res.text().await.unwrap_or_default()
            ));
        }

        let parsed: MessagesResponse = res.json().await?;
        Ok(ModelResponse {
            content: parsed.content,
            stop_reason: StopReason::from_api(parsed.stop_reason.as_deref()),
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request<'a>(
        messages: &'a [ChatMessage],
        tools: &'a [ToolSpec],
    ) -> ModelRequest<'a> {
        ModelRequest {
            model: "claude-sonnet-4-20250514",
            max_tokens: 1024,
            system: "You review clinical cases.",
            messages,
            tools,
        }
    }

    #[test]
    fn request_body_carries_conversation() {
        let messages = vec![ChatMessage::user(vec![ContentBlock::Text {
            text: "Review case c-42.".to_string(),
        }])];
        let tools = vec![ToolSpec {
            name: "pull_chart".to_string(),
            description: "Fetch the chart".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }];

        let body = serde_json::to_value(AnthropicClient::build_request(&sample_request(
            &messages, &tools,
        )))
        .unwrap();

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "You review clinical cases.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["tools"][0]["name"], "pull_chart");
        assert!(body["tools"][0]["input_schema"].is_object());
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let messages = vec![ChatMessage::user(vec![ContentBlock::Text {
            text: "hi".to_string(),
        }])];
        let body =
            serde_json::to_value(AnthropicClient::build_request(&sample_request(&messages, &[])))
                .unwrap();
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn response_parses_tool_use_blocks() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Pulling the chart."},
                {"type": "tool_use", "id": "toolu_1", "name": "pull_chart", "input": {"case_id": "c-42"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 210, "output_tokens": 45}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(
            &parsed.content[1],
            ContentBlock::ToolUse { name, .. } if name == "pull_chart"
        ));
        assert_eq!(
            StopReason::from_api(parsed.stop_reason.as_deref()),
            StopReason::ToolUse
        );
        assert_eq!(parsed.usage.input_tokens, 210);
        assert_eq!(parsed.usage.output_tokens, 45);
    }

    #[test]
    fn missing_api_key_fails_construction() {
        let config = ModelConfig {
            api_key_env: "ADJUDEX_TEST_NO_SUCH_KEY".to_string(),
            ..ModelConfig::default()
        };
        let err = AnthropicClient::new(&config).unwrap_err();
        assert!(err.to_string().contains("ADJUDEX_TEST_NO_SUCH_KEY"));
    }
}
