//! Workflow compilation for skein.
//!
//! Turns author-facing DAGs into engine flows: topological ordering, branch
//! and loop scope reconstruction, reference resolution, and directive
//! translation. Also home to the deterministic DAG signature and the
//! signature-derived naming scheme.

pub mod compile;
pub mod mapping;
pub mod naming;
pub mod plan;
pub mod signature;
pub mod wire;

pub use compile::compile_dag;
pub use mapping::normalize_id;
pub use naming::{
    flow_path, pick_signature_name, slugify, style_slug, styled_signature_name, word_count,
};
pub use plan::{ExecutionPlan, InputField, ModulePlan, PlanKind, RetryPolicy};
pub use signature::dag_signature;
pub use wire::{Flow, FlowValue, InputTransform, Module, ModuleValue};
