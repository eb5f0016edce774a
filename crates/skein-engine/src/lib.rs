//! Engine-facing half of skein: the HTTP client for the external execution
//! engine, SQLite persistence for workflows and runs, deployment
//! orchestration, and the run-lifecycle poller.
//!
//! Everything here degrades gracefully when no engine is configured:
//! workflows still compile and persist, runs are recorded without jobs.

pub mod client;
pub mod deploy;
pub mod poller;
pub mod runs;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::EngineClient;
pub use deploy::{deploy_generated, deploy_named, DeployAction, DeployOutcome, NamedWorkflowSpec};
pub use poller::JobPoller;
pub use store::WorkflowStore;
