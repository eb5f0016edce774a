pub mod config;
pub mod dag;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;
pub mod validator;

pub use config::AppConfig;
pub use dag::{Dag, DagEdge, DagNode};
pub use error::{Result, SkeinError};
pub use registry::{NodeRegistry, RegistryEntry};
pub use types::*;
pub use validator::{validate_dag, ValidationIssue, ValidationOutcome};
