use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use skein_core::error::{Result, SkeinError};
use skein_core::registry::NodeRegistry;
use skein_core::traits::{LlmClient, ServiceDiscovery};
use skein_core::types::{
    ChatMessage, ChatRequest, ContentBlock, GeneratedWorkflow, GenerationRequest, ToolChoice,
};
use skein_core::validator::{validate_dag, ValidationIssue};

use crate::prompts::{
    agentic_tools, build_retry_message, build_system_prompt, create_workflow_tool, PromptOptions,
    CREATE_WORKFLOW, GET_SERVICE_ENDPOINTS, LIST_SERVICES,
};

/// Validation failures tolerated before generation gives up.
const MAX_RETRIES: usize = 2;
/// Upper bound on model round trips, discovery turns included.
const MAX_AGENT_TURNS: usize = 10;
const FORCED_MAX_TOKENS: u32 = 4096;
const AGENTIC_MAX_TOKENS: u32 = 16384;

/// Drives the model through tool calls until it produces a DAG that passes
/// structural validation.
///
/// With a discovery collaborator the loop runs agentically: the model may
/// inspect the live API registry before committing to a workflow. Without one
/// it gets the static catalog and a forced `create_workflow` call.
pub struct WorkflowGenerator {
    llm: Arc<dyn LlmClient>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    registry: Arc<NodeRegistry>,
}

struct ToolOutput {
    content: String,
    is_error: bool,
}

impl ToolOutput {
    fn ok(content: String) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    fn error(content: String) -> Self {
        Self {
            content,
            is_error: true,
        }
    }
}

impl WorkflowGenerator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        discovery: Option<Arc<dyn ServiceDiscovery>>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            llm,
            discovery,
            registry,
        }
    }

    /// Generate a workflow for the request, retrying on validation failures
    /// and resolving discovery tool calls along the way.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedWorkflow> {
        let agentic = self.discovery.is_some();
        let filter = request
            .hints
            .as_ref()
            .map(|h| h.services.as_slice())
            .filter(|s| !s.is_empty());

        let system = build_system_prompt(
            &self.registry,
            &PromptOptions {
                filter_services: filter,
                agentic,
                style_directive: request.style.as_ref().map(|s| s.directive()),
            },
        );

        let tools = if agentic {
            agentic_tools()
        } else {
            vec![create_workflow_tool()]
        };
        let tool_choice = if agentic {
            ToolChoice::Auto
        } else {
            ToolChoice::Tool(CREATE_WORKFLOW.to_string())
        };
        let max_tokens = if agentic {
            AGENTIC_MAX_TOKENS
        } else {
            FORCED_MAX_TOKENS
        };

        let mut messages = vec![ChatMessage::user(user_message(request))];
        let mut retries = 0usize;

        for turn in 0..MAX_AGENT_TURNS {
            let response = self
                .llm
                .chat(ChatRequest {
                    messages: messages.clone(),
                    tools: tools.clone(),
                    tool_choice: tool_choice.clone(),
                    system: Some(system.clone()),
                    max_tokens,
                })
                .await?;

            let create_call = response
                .tool_uses()
                .into_iter()
                .find(|(_, name, _)| *name == CREATE_WORKFLOW)
                .map(|(id, _, input)| (id.to_string(), input.clone()));

            if let Some((tool_use_id, input)) = create_call {
                let issues = match serde_json::from_value::<GeneratedWorkflow>(input) {
                    Ok(candidate) => {
                        let outcome = validate_dag(&candidate.dag, &self.registry);
                        if outcome.valid {
                            info!(
                                turn,
                                nodes = candidate.dag.nodes.len(),
                                category = %candidate.category,
                                "Generated workflow passed validation"
                            );
                            return Ok(candidate);
                        }
                        outcome.errors
                    }
                    Err(e) => vec![ValidationIssue::new(
                        "dag",
                        format!("Tool input did not parse: {}", e),
                    )],
                };

                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(SkeinError::GenerationInvalid {
                        message: "Generated DAG is invalid after retries".to_string(),
                        errors: issues,
                    });
                }

                warn!(
                    turn,
                    issues = issues.len(),
                    "Generated DAG failed validation, asking for a fix"
                );
                let feedback = build_retry_message(&request.description, &issues);
                messages.push(ChatMessage::assistant(response.content));
                messages.push(ChatMessage::tool_results(vec![ContentBlock::ToolResult {
                    tool_use_id,
                    content: feedback,
                    is_error: true,
                }]));
                continue;
            }

            let requested: Vec<(String, String, Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if requested.is_empty() {
                return Err(SkeinError::Protocol(
                    "LLM did not return a tool use response".to_string(),
                ));
            }

            messages.push(ChatMessage::assistant(response.content));

            let mut results = Vec::with_capacity(requested.len());
            for (id, name, input) in requested {
                debug!(tool = %name, "Resolving discovery tool call");
                let output = self.resolve_tool(&name, &input).await;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: output.content,
                    is_error: output.is_error,
                });
            }
            messages.push(ChatMessage::tool_results(results));
        }

        Err(SkeinError::TurnsExhausted(MAX_AGENT_TURNS))
    }

    async fn resolve_tool(&self, name: &str, input: &Value) -> ToolOutput {
        match name {
            LIST_SERVICES => match self.list_services_summary().await {
                Ok(content) => ToolOutput::ok(content),
                Err(e) => ToolOutput::error(format!("Error: {}", e)),
            },
            GET_SERVICE_ENDPOINTS => {
                let Some(service) = input.get("service").and_then(Value::as_str) else {
                    return ToolOutput::error(
                        "Error: get_service_endpoints requires a \"service\" argument".to_string(),
                    );
                };
                match self.service_spec(service).await {
                    Ok(content) => ToolOutput::ok(content),
                    Err(e) => ToolOutput::error(format!("Error: {}", e)),
                }
            }
            other => ToolOutput::error(format!("Unknown tool: {}", other)),
        }
    }

    /// Compact per-service summary the model can scan in one read.
    async fn list_services_summary(&self) -> Result<String> {
        let discovery = self.require_discovery()?;
        let services = discovery.list_services().await?;

        let summary: Vec<Value> = services
            .iter()
            .map(|s| {
                json!({
                    "name": s.service,
                    "description": s.description.as_deref().or(s.title.as_deref()).unwrap_or(""),
                    "endpointCount": s.endpoints.len(),
                    "endpoints": s.endpoints
                        .iter()
                        .map(|e| format!("{} {}", e.method, e.path))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();

        Ok(serde_json::to_string_pretty(&summary)?)
    }

    async fn service_spec(&self, service: &str) -> Result<String> {
        let discovery = self.require_discovery()?;
        let spec = discovery.get_service(service).await?;
        Ok(serde_json::to_string_pretty(&spec)?)
    }

    fn require_discovery(&self) -> Result<&Arc<dyn ServiceDiscovery>> {
        self.discovery
            .as_ref()
            .ok_or_else(|| SkeinError::Discovery("service discovery is not configured".into()))
    }
}

fn user_message(request: &GenerationRequest) -> String {
    let mut message = request.description.clone();
    if let Some(hints) = &request.hints {
        if !hints.services.is_empty() {
            message.push_str("\n\nRelevant services: ");
            message.push_str(&hints.services.join(", "));
        }
        if !hints.node_types.is_empty() {
            message.push_str("\nPreferred node types: ");
            message.push_str(&hints.node_types.join(", "));
        }
        if !hints.expected_inputs.is_empty() {
            message.push_str("\nExpected flow_input fields: ");
            message.push_str(&hints.expected_inputs.join(", "));
        }
    }
    message
}
