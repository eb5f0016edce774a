//! LLM-driven workflow generation.
//!
//! The generator asks the model for a DAG through the `create_workflow`
//! tool, validates what comes back, and feeds failures into a bounded retry
//! conversation. With an API-registry collaborator configured the loop runs
//! agentically: the model can list live services and pull OpenAPI specs
//! before committing to a design. Without one it works from the static
//! service catalog and must answer immediately.

pub mod catalog;
pub mod discovery;
pub mod generator;
pub mod prompts;

pub use discovery::ApiRegistryClient;
pub use generator::WorkflowGenerator;
