//! Tool schemas and prompt assembly for workflow generation.

use serde_json::json;

use skein_core::registry::NodeRegistry;
use skein_core::types::ToolDefinition;
use skein_core::validator::ValidationIssue;

use crate::catalog::catalog_for_prompt;

pub const CREATE_WORKFLOW: &str = "create_workflow";
pub const LIST_SERVICES: &str = "list_services";
pub const GET_SERVICE_ENDPOINTS: &str = "get_service_endpoints";

/// Structured-output tool the model calls to hand back a DAG with its
/// dimensions. The schema mirrors the wire form of [`skein_core::dag::Dag`].
pub fn create_workflow_tool() -> ToolDefinition {
    ToolDefinition {
        name: CREATE_WORKFLOW.to_string(),
        description: "Create a valid DAG workflow with dimensions based on the user's description"
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": ["sales", "pr"],
                    "description": "Workflow category"
                },
                "channel": {
                    "type": "string",
                    "enum": ["email"],
                    "description": "Distribution channel"
                },
                "audienceType": {
                    "type": "string",
                    "enum": ["cold-outreach"],
                    "description": "Audience type"
                },
                "description": {
                    "type": "string",
                    "description": "Human-readable description of what this workflow does (1-2 sentences)"
                },
                "dag": {
                    "type": "object",
                    "properties": {
                        "nodes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "id": { "type": "string" },
                                    "type": { "type": "string" },
                                    "config": { "type": "object" },
                                    "inputMapping": { "type": "object" },
                                    "retries": { "type": "number" }
                                },
                                "required": ["id", "type"]
                            }
                        },
                        "edges": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "from": { "type": "string" },
                                    "to": { "type": "string" },
                                    "condition": { "type": "string" }
                                },
                                "required": ["from", "to"]
                            }
                        },
                        "onError": { "type": "string" }
                    },
                    "required": ["nodes", "edges"]
                }
            },
            "required": ["category", "channel", "audienceType", "description", "dag"]
        }),
    }
}

/// Discovery tool: list every service the API registry knows about.
pub fn list_services_tool() -> ToolDefinition {
    ToolDefinition {
        name: LIST_SERVICES.to_string(),
        description: "List all available microservices in the platform. Returns service name, \
                      description, and endpoint summaries. Call this FIRST to understand what \
                      services are available before designing the workflow."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Discovery tool: pull the full OpenAPI spec of one service.
pub fn get_service_endpoints_tool() -> ToolDefinition {
    ToolDefinition {
        name: GET_SERVICE_ENDPOINTS.to_string(),
        description: "Get the full OpenAPI specification for a specific service, including all \
                      endpoints, request/response schemas, required fields, and parameter \
                      details. Call this for EACH service you plan to use in the workflow to \
                      understand exact endpoint paths, required body fields, and response \
                      shapes. Do NOT guess. Always verify first."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "service": {
                    "type": "string",
                    "description": "The service name (e.g. 'lead', 'campaign', 'brand')"
                }
            },
            "required": ["service"]
        }),
    }
}

/// Tool set for agentic generation: discovery first, then the DAG tool.
pub fn agentic_tools() -> Vec<ToolDefinition> {
    vec![
        list_services_tool(),
        get_service_endpoints_tool(),
        create_workflow_tool(),
    ]
}

/// Knobs for system-prompt assembly.
#[derive(Default)]
pub struct PromptOptions<'a> {
    /// Narrow the static catalog to these services.
    pub filter_services: Option<&'a [String]>,
    /// Replace the static catalog with mandatory discovery instructions.
    pub agentic: bool,
    /// Extra section instructing the model to match a voice.
    pub style_directive: Option<String>,
}

const PROMPT_INTRO: &str = r#"You are a workflow architect that generates valid DAG (Directed Acyclic Graph) workflows.

## DAG Format

A workflow DAG has:
- **nodes**: Array of steps. Each node: { id (string, kebab-case), type (string), config? (object), inputMapping? (object), retries? (number) }
- **edges**: Array of { from, to, condition? } defining execution order.
- **onError**: Optional node ID that runs when any step fails.

## Recommended Node Type: http.call

Use "http.call" for all service calls. Config:
- service (string): service name, maps to {SERVICE}_SERVICE_URL env var
- method (string): HTTP verb (GET, POST, PUT, DELETE)
- path (string): endpoint path
- body (object, optional): static request body parts
- query (object, optional): query params

Example:
{
  "id": "fetch-lead",
  "type": "http.call",
  "config": { "service": "lead", "method": "POST", "path": "/buffer/next" },
  "inputMapping": { "body.campaignId": "$ref:flow_input.campaignId" },
  "retries": 0
}

## Flow Control Node Types

- "condition": if/then/else branching. Outgoing edges WITH a condition expression define branches (target nodes are nested inside that branch). Outgoing edges WITHOUT condition are after-branch steps that always execute after the branch completes.
- "wait": delay. config: { seconds: number }
- "for-each": loop over items. config: { iterator: string (JS expression), parallel?: boolean, skipFailures?: boolean }

## Input Mapping ($ref syntax)

Use inputMapping to pass dynamic data between nodes:
- "$ref:flow_input.fieldName": a field of the workflow execution inputs
- "$ref:node-id.output.fieldName": a field of a previous node's output
- "$ref:node-id.output": the entire output of a previous node

Dot-notation keys create nested objects:
- "body.campaignId": "$ref:flow_input.campaignId" → body: { campaignId: ... }
- "body.metadata.source": "$ref:flow_input.source" → body: { metadata: { source: ... } }

Static body fields go in config.body, dynamic overrides go in inputMapping with dot-notation.

## Special Config Keys (stripped before passing to script)

- retries (number): retry attempts on failure. Default 3. Set 0 for non-idempotent ops (email sends, SMS, queue consumes).
- stopAfterIf (string): JS expression using "result" variable. Stops the entire flow gracefully when true. No onError triggered. Example: "result.allowed == false"
- skipIf (string): JS expression using "results.<module_id>". Skips only this step when true. Example: "results.fetch_lead.found == false"
- validateResponse ({ field, equals }): throws error if response[field] !== equals, triggers onError handler.

## Dimension Enums (MUST pick from these)

- category: "sales" | "pr"
- channel: "email"
- audienceType: "cold-outreach"
"#;

const AGENTIC_DISCOVERY_SECTION: &str = r#"## Service Discovery (MANDATORY)

You have access to a live API registry via tools. Before generating the workflow, you MUST:
1. Call list_services to see all available microservices and their endpoints
2. Call get_service_endpoints for EACH service you plan to use in the workflow; this gives you exact endpoint paths, required request body fields, and response schemas
3. Only then call create_workflow with an informed DAG based on verified endpoint specs

Do NOT guess endpoint paths or request body fields. ALWAYS verify with get_service_endpoints first.
If a service or endpoint you need does not exist, do NOT invent it; adjust the workflow to use only real endpoints."#;

const PROMPT_GUIDANCE: &str = r#"## Campaign Execution Model

Campaign service orchestrates workflow execution with budget constraints. Key concepts:
- A campaign has budget limits: max leads and/or max spend, scoped per day, per week, or per month
- Campaign service triggers the workflow (DAG) repeatedly, roughly every minute, until the budget is exhausted
- Each workflow run processes ONE unit of work (e.g. one lead, one email send)
- The gate-check step validates that budget remains before each run; if budget is exhausted, it returns allowed=false and the flow stops gracefully via stopAfterIf
- The end-run step reports success/failure so campaign service knows whether to continue re-triggering
- This is why campaign workflows MUST use the chassis pattern: gate-check → start-run → [business logic] → end-run, with onError → end-run-error

## Rules

1. Node IDs: unique, kebab-case, descriptive (e.g. "fetch-lead", "send-email", "check-status")
2. No cycles: edges must form a DAG
3. Every $ref must reference an existing node ID or flow_input
4. Set retries: 0 for non-idempotent operations (email sends, SMS, queue consumes)
5. Use onError for workflows that need cleanup on failure (e.g. mark run as failed via end-run)
6. Use "condition" nodes for branching, not skipIf (skipIf only skips one step)
7. The http.call node auto-injects appId and serviceEnvs from flow_input; no need to map them
8. Campaign workflows should use the chassis pattern: gate-check → start-run → ... → end-run, with onError → end-run-error

## Example: Cold Email Outreach with Branching

```json
{
  "nodes": [
    {
      "id": "gate-check",
      "type": "http.call",
      "config": { "service": "campaign", "method": "POST", "path": "/internal/gate-check", "stopAfterIf": "result.allowed == false" },
      "inputMapping": { "body.campaignId": "$ref:flow_input.campaignId", "body.orgId": "$ref:flow_input.orgId" }
    },
    {
      "id": "start-run",
      "type": "http.call",
      "config": { "service": "campaign", "method": "POST", "path": "/internal/start-run" },
      "inputMapping": { "body.campaignId": "$ref:flow_input.campaignId", "body.orgId": "$ref:flow_input.orgId" }
    },
    {
      "id": "fetch-lead",
      "type": "http.call",
      "config": { "service": "lead", "method": "POST", "path": "/buffer/next" },
      "inputMapping": { "body.campaignId": "$ref:flow_input.campaignId", "body.appId": "$ref:start-run.output.appId" },
      "retries": 0
    },
    { "id": "check-lead", "type": "condition" },
    {
      "id": "brand-profile",
      "type": "http.call",
      "config": { "service": "brand", "method": "POST", "path": "/sales-profile" },
      "inputMapping": { "body.brandId": "$ref:start-run.output.brandId" }
    },
    {
      "id": "email-generate",
      "type": "http.call",
      "config": { "service": "content-generation", "method": "POST", "path": "/generate" },
      "inputMapping": { "body.lead": "$ref:fetch-lead.output.lead", "body.brandProfile": "$ref:brand-profile.output" },
      "retries": 0
    },
    {
      "id": "email-send",
      "type": "http.call",
      "config": { "service": "email-gateway", "method": "POST", "path": "/send" },
      "inputMapping": { "body.to": "$ref:fetch-lead.output.lead.data.email", "body.subject": "$ref:email-generate.output.subject", "body.bodyHtml": "$ref:email-generate.output.bodyHtml" },
      "retries": 0
    },
    {
      "id": "end-run",
      "type": "http.call",
      "config": { "service": "campaign", "method": "POST", "path": "/internal/end-run", "body": { "success": true } },
      "inputMapping": { "body.campaignId": "$ref:flow_input.campaignId", "body.leadFound": "$ref:fetch-lead.output.found" }
    },
    {
      "id": "end-run-error",
      "type": "http.call",
      "config": { "service": "campaign", "method": "POST", "path": "/internal/end-run", "body": { "success": false } },
      "inputMapping": { "body.campaignId": "$ref:flow_input.campaignId" }
    }
  ],
  "edges": [
    { "from": "gate-check", "to": "start-run" },
    { "from": "start-run", "to": "fetch-lead" },
    { "from": "fetch-lead", "to": "check-lead" },
    { "from": "check-lead", "to": "brand-profile", "condition": "results.fetch_lead.found == true" },
    { "from": "brand-profile", "to": "email-generate" },
    { "from": "email-generate", "to": "email-send" },
    { "from": "check-lead", "to": "end-run" }
  ],
  "onError": "end-run-error"
}
```

## Example: Simple For-Each Loop

```json
{
  "nodes": [
    { "id": "fetch-contacts", "type": "http.call", "config": { "service": "client", "method": "GET", "path": "/users" } },
    { "id": "loop-contacts", "type": "for-each", "config": { "iterator": "results.fetch_contacts.users", "parallel": false } },
    { "id": "send-email", "type": "http.call", "config": { "service": "transactional-email", "method": "POST", "path": "/send" }, "inputMapping": { "body.recipientEmail": "$ref:loop-contacts.output.email" }, "retries": 0 }
  ],
  "edges": [
    { "from": "fetch-contacts", "to": "loop-contacts" },
    { "from": "loop-contacts", "to": "send-email" }
  ]
}
```
"#;

/// Assemble the system prompt for a generation conversation.
pub fn build_system_prompt(registry: &NodeRegistry, options: &PromptOptions<'_>) -> String {
    let node_types = registry
        .type_names()
        .iter()
        .map(|name| {
            if registry.is_native(name) {
                format!("- \"{}\" (native flow control)", name)
            } else {
                format!("- \"{}\"", name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let service_section = if options.agentic {
        AGENTIC_DISCOVERY_SECTION.to_string()
    } else {
        format!(
            "## Available Services\n\n{}",
            catalog_for_prompt(options.filter_services)
        )
    };

    let mut prompt = String::with_capacity(12 * 1024);
    prompt.push_str(PROMPT_INTRO);
    prompt.push('\n');
    prompt.push_str(&service_section);
    prompt.push_str("\n\n## All Registered Node Types\n\n");
    prompt.push_str(&node_types);
    prompt.push_str("\n\nPrefer \"http.call\" over legacy named types for new workflows.\n\n");
    prompt.push_str(PROMPT_GUIDANCE);
    prompt.push('\n');
    if let Some(style) = &options.style_directive {
        prompt.push_str("## Style Directive\n\n");
        prompt.push_str(style);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Generate a single workflow DAG that fulfills the user's description. \
         Use the create_workflow tool to return the result.",
    );
    prompt
}

/// Feedback sent back to the model when a generated DAG fails validation.
pub fn build_retry_message(description: &str, issues: &[ValidationIssue]) -> String {
    let error_list = issues
        .iter()
        .map(|i| format!("- {}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "The DAG you generated was invalid. Fix these errors and try again:\n\n\
         {}\n\n\
         Original request: {}",
        error_list, description
    )
}
