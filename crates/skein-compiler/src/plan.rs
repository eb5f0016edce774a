//! Intermediate representation of a compiled workflow.
//!
//! The compiler produces this tagged tree first; serialization to the
//! engine's wire format is a separate, mechanical lowering step. Keeping the
//! graph logic off the wire types makes the scope reconstruction testable on
//! its own.

use serde_json::{json, Map, Value};

use crate::wire::{
    Branch, Flow, FlowValue, InputTransform, InputTransforms, Module, ModuleValue, RetrySpec,
    SkipIf, StopAfterIf,
};

/// Retry directive attached to a script step. `attempts: 0` is meaningful:
/// it tells the engine "never retry", distinct from having no directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub seconds: u32,
}

#[derive(Debug, Clone)]
pub struct BranchPlan {
    pub expr: String,
    pub body: Vec<ModulePlan>,
}

/// What one compiled step does.
#[derive(Debug, Clone)]
pub enum PlanKind {
    Script {
        path: String,
        params: InputTransforms,
    },
    Sleep {
        seconds: u64,
    },
    Branch {
        branches: Vec<BranchPlan>,
    },
    Loop {
        iterator_expr: String,
        parallel: bool,
        skip_failures: bool,
        body: Vec<ModulePlan>,
    },
}

/// One node of the compiled plan tree. Owns its children by value.
#[derive(Debug, Clone)]
pub struct ModulePlan {
    /// Normalized module id (node id with hyphens replaced).
    pub id: String,
    pub summary: Option<String>,
    pub kind: PlanKind,
    pub retry: Option<RetryPolicy>,
    pub stop_after_expr: Option<String>,
    pub skip_if_expr: Option<String>,
}

impl ModulePlan {
    /// Lower this plan node (and its children) to the wire format.
    pub fn to_module(&self) -> Module {
        let value = match &self.kind {
            PlanKind::Script { path, params } => ModuleValue::Script {
                path: path.clone(),
                input_transforms: params.clone(),
            },
            PlanKind::Sleep { .. } => ModuleValue::RawScript {
                content: String::new(),
                language: "bun".to_string(),
                input_transforms: None,
            },
            PlanKind::Branch { branches } => ModuleValue::BranchOne {
                branches: branches
                    .iter()
                    .map(|b| Branch {
                        summary: Some(b.expr.clone()),
                        expr: b.expr.clone(),
                        modules: b.body.iter().map(ModulePlan::to_module).collect(),
                    })
                    .collect(),
                default: Vec::new(),
            },
            PlanKind::Loop {
                iterator_expr,
                parallel,
                skip_failures,
                body,
            } => ModuleValue::ForLoop {
                iterator: InputTransform::javascript(iterator_expr.clone()),
                modules: body.iter().map(ModulePlan::to_module).collect(),
                skip_failures: *skip_failures,
                parallel: *parallel,
            },
        };

        Module {
            id: self.id.clone(),
            summary: self.summary.clone(),
            value,
            sleep: match &self.kind {
                PlanKind::Sleep { seconds } => Some(InputTransform::static_value(*seconds)),
                _ => None,
            },
            retry: self
                .retry
                .as_ref()
                .map(|r| RetrySpec::constant(r.attempts, r.seconds)),
            stop_after_if: self.stop_after_expr.as_ref().map(|expr| StopAfterIf {
                expr: expr.clone(),
                skip_if_stopped: Some(true),
            }),
            skip_if: self.skip_if_expr.as_ref().map(|expr| SkipIf { expr: expr.clone() }),
        }
    }
}

/// A run input the compiled flow declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputField {
    pub name: String,
    pub schema_type: String,
    pub description: Option<String>,
}

impl InputField {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_type: "string".to_string(),
            description: None,
        }
    }
}

/// The complete compiled workflow, pre-serialization.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub summary: String,
    pub modules: Vec<ModulePlan>,
    pub failure_module: Option<ModulePlan>,
    pub inputs: Vec<InputField>,
}

impl ExecutionPlan {
    /// Serialize to the engine wire format.
    pub fn to_flow(&self) -> Flow {
        Flow {
            summary: self.summary.clone(),
            description: None,
            value: FlowValue {
                modules: self.modules.iter().map(ModulePlan::to_module).collect(),
                same_worker: false,
                failure_module: self
                    .failure_module
                    .as_ref()
                    .map(|m| Box::new(m.to_module())),
            },
            schema: self.input_schema(),
        }
    }

    /// JSON schema declaring the run inputs the engine should accept.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.inputs {
            let mut prop = Map::new();
            prop.insert("type".to_string(), Value::String(field.schema_type.clone()));
            if let Some(description) = &field.description {
                prop.insert(
                    "description".to_string(),
                    Value::String(description.clone()),
                );
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }

        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": properties,
            "required": [],
        })
    }
}
