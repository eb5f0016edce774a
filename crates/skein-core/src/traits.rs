use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse, JobStatus, ServiceSummary};

/// A chat-completion provider capable of tool use.
///
/// One call is one complete round trip; tool-call inputs arrive fully formed
/// in the response, which is what the generation loop needs to parse and
/// validate them.
pub trait LlmClient: std::fmt::Debug + Send + Sync + 'static {
    fn chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>>;

    /// Model identifier requests are issued against.
    fn model(&self) -> &str;
}

/// The externally hosted workflow-execution engine.
///
/// Constructed once and passed in wherever it is needed; callers that can
/// operate without an engine take `Option<Arc<dyn WorkflowEngine>>`.
pub trait WorkflowEngine: Send + Sync + 'static {
    /// Create a flow and return its path on the engine.
    fn create_flow(
        &self,
        path: &str,
        summary: &str,
        description: Option<&str>,
        value: Value,
        schema: Option<Value>,
    ) -> BoxFuture<'_, Result<String>>;

    /// Replace an existing flow's definition.
    fn update_flow(&self, path: &str, flow: Value) -> BoxFuture<'_, Result<()>>;

    fn delete_flow(&self, path: &str) -> BoxFuture<'_, Result<()>>;

    /// Start a run and return the engine's job id.
    fn run_flow(&self, path: &str, args: Value) -> BoxFuture<'_, Result<String>>;

    fn get_job(&self, job_id: &str) -> BoxFuture<'_, Result<JobStatus>>;

    fn cancel_job(&self, job_id: &str, reason: &str) -> BoxFuture<'_, Result<()>>;

    fn health_check(&self) -> BoxFuture<'_, Result<bool>>;
}

/// Downstream-service discovery used by the agentic generation mode.
pub trait ServiceDiscovery: Send + Sync + 'static {
    /// Summaries of every service the registry knows about.
    fn list_services(&self) -> BoxFuture<'_, Result<Vec<ServiceSummary>>>;

    /// The full interface description of one service, as opaque JSON.
    fn get_service(&self, service: &str) -> BoxFuture<'_, Result<Value>>;
}
