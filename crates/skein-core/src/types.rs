use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dag::Dag;

/// Lifecycle state of a workflow run.
///
/// `queued → running → {completed, failed}`; `queued` and `running` may also
/// move to `cancelled` on an explicit cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Active runs are the ones the poller reconciles.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a deployed workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    /// Set once the engine accepts the run; absent in degraded mode.
    pub external_job_id: Option<String>,
    pub status: RunStatus,
    pub inputs: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn queued(
        workflow_id: impl Into<String>,
        external_job_id: Option<String>,
        inputs: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            external_job_id,
            status: RunStatus::Queued,
            inputs,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// A deployed workflow as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub description: Option<String>,
    pub dag: Dag,
    /// Path of the compiled flow on the engine, when one was pushed.
    pub flow_path: Option<String>,
    pub category: Option<String>,
    pub channel: Option<String>,
    pub audience_type: Option<String>,
    /// Canonical content hash; set for signature-deployed workflows.
    pub signature: Option<String>,
    pub signature_name: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a job as reported by the external engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    /// Completed-job payloads may omit this; absent means not running.
    #[serde(default)]
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled: Option<bool>,
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A chat message in the generation conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Tool results go back to the model as a user message.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: blocks,
        }
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// How the model is allowed to pick tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    /// The model decides whether and which tool to call.
    Auto,
    /// The model must call the named tool.
    Tool(String),
}

/// One round trip's worth of request state for an LLM call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub system: Option<String>,
    pub max_tokens: u32,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
}

impl ChatResponse {
    /// Extract all tool use blocks from this response.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// Extract all text content from this response.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// One endpoint of a discovered downstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_fields: Vec<String>,
}

/// What the discovery collaborator reports about one downstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub service: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointSummary>,
}

/// Optional guidance attached to a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationHints {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub node_types: Vec<String>,
    #[serde(default)]
    pub expected_inputs: Vec<String>,
}

/// Voice/copy style a generated workflow should follow, scoped to a person
/// or a brand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Style {
    #[serde(rename_all = "camelCase")]
    Human { human_id: String, name: String },
    #[serde(rename_all = "camelCase")]
    Brand { brand_id: String, name: String },
}

impl Style {
    pub fn name(&self) -> &str {
        match self {
            Style::Human { name, .. } => name,
            Style::Brand { name, .. } => name,
        }
    }

    /// Prompt section instructing the model to match the style.
    pub fn directive(&self) -> String {
        match self {
            Style::Human { name, .. } => format!(
                "Write all user-facing copy in the personal voice and style of {}.",
                name
            ),
            Style::Brand { name, .. } => format!(
                "Write all user-facing copy in the brand voice of {}.",
                name
            ),
        }
    }
}

/// What the caller asks the generation agent for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<GenerationHints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,
}

impl GenerationRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            hints: None,
            style: None,
        }
    }
}

/// What the generation agent hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedWorkflow {
    pub dag: Dag,
    pub category: String,
    pub channel: String,
    pub audience_type: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips_through_strings() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("paused"), None);
        assert!(RunStatus::Queued.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::Failed.is_active());
    }

    #[test]
    fn style_parses_tagged_wire_form() {
        let style: Style = serde_json::from_value(serde_json::json!({
            "type": "human", "humanId": "human-123", "name": "Hormozi"
        }))
        .unwrap();
        assert_eq!(
            style,
            Style::Human {
                human_id: "human-123".into(),
                name: "Hormozi".into()
            }
        );
        assert_eq!(style.name(), "Hormozi");
    }

    #[test]
    fn chat_response_extracts_tool_uses() {
        let response = ChatResponse {
            content: vec![
                ContentBlock::Text {
                    text: "thinking out loud".into(),
                },
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "create_workflow".into(),
                    input: serde_json::json!({"category": "sales"}),
                },
            ],
            stop_reason: Some(StopReason::ToolUse),
        };
        let uses = response.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "create_workflow");
        assert_eq!(response.text(), "thinking out loud");
    }
}
