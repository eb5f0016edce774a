use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use skein_core::config::LlmConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::LlmClient;
use skein_core::types::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    model_id: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SkeinError::Config("Anthropic API key not set".into()))?;
        Ok(Self {
            http: Client::new(),
            api_key,
            model_id: config.model_id.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
        })
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: Value,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|msg| ApiMessage {
            role: match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: convert_content_blocks(&msg.content),
        })
        .collect()
}

fn convert_content_blocks(blocks: &[ContentBlock]) -> Value {
    if blocks.len() == 1 {
        if let ContentBlock::Text { text } = &blocks[0] {
            return Value::String(text.clone());
        }
    }

    let api_blocks: Vec<Value> = blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => json!({
                "type": "text",
                "text": text,
            }),
            ContentBlock::ToolUse { id, name, input } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }),
        })
        .collect();

    Value::Array(api_blocks)
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
    }
}

/// Map response content blocks back into core types, skipping block types
/// this service has no use for.
fn parse_content(blocks: &[Value]) -> Vec<ContentBlock> {
    let mut content = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                content.push(ContentBlock::ToolUse { id, name, input });
            }
            other => {
                warn!(block_type = ?other, "Skipping unrecognized content block");
            }
        }
    }
    content
}

fn parse_stop_reason(raw: Option<&str>) -> Option<StopReason> {
    match raw {
        Some("end_turn") => Some(StopReason::EndTurn),
        Some("tool_use") => Some(StopReason::ToolUse),
        Some("max_tokens") => Some(StopReason::MaxTokens),
        Some("stop_sequence") => Some(StopReason::StopSequence),
        _ => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(async move {
            let ChatRequest {
                messages,
                tools,
                tool_choice,
                system,
                max_tokens,
            } = request;

            let api_tools: Vec<ApiTool> = tools
                .iter()
                .map(|t| ApiTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect();

            // tool_choice is only valid alongside a tools array.
            let tool_choice = if api_tools.is_empty() {
                None
            } else {
                Some(tool_choice_value(&tool_choice))
            };

            let body = AnthropicRequest {
                model: self.model_id.clone(),
                max_tokens,
                messages: convert_messages(&messages),
                system,
                tools: api_tools,
                tool_choice,
            };

            let response = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| SkeinError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(SkeinError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| SkeinError::LlmParse(e.to_string()))?;

            if let Some(usage) = &parsed.usage {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }

            Ok(ChatResponse {
                content: parse_content(&parsed.content),
                stop_reason: parse_stop_reason(parsed.stop_reason.as_deref()),
            })
        })
    }

    fn model(&self) -> &str {
        &self.model_id
    }
}
