//! Wire format accepted by the execution engine's flow API.
//!
//! These types serialize to the exact JSON the engine expects; everything
//! upstream of serialization works on [`crate::plan::ModulePlan`] instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parameter fed to a module: either a literal or an expression evaluated
/// by the engine at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputTransform {
    #[serde(rename = "static")]
    Static { value: Value },
    #[serde(rename = "javascript")]
    Javascript { expr: String },
}

impl InputTransform {
    pub fn static_value(value: impl Into<Value>) -> Self {
        InputTransform::Static {
            value: value.into(),
        }
    }

    pub fn javascript(expr: impl Into<String>) -> Self {
        InputTransform::Javascript { expr: expr.into() }
    }
}

/// Parameters are kept in a BTreeMap so serialized plans are deterministic.
pub type InputTransforms = BTreeMap<String, InputTransform>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub expr: String,
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModuleValue {
    #[serde(rename = "script")]
    Script {
        path: String,
        input_transforms: InputTransforms,
    },

    #[serde(rename = "rawscript")]
    RawScript {
        content: String,
        language: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input_transforms: Option<InputTransforms>,
    },

    #[serde(rename = "branchone")]
    BranchOne {
        branches: Vec<Branch>,
        default: Vec<Module>,
    },

    #[serde(rename = "forloopflow")]
    ForLoop {
        iterator: InputTransform,
        modules: Vec<Module>,
        skip_failures: bool,
        parallel: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantRetry {
    pub attempts: u32,
    pub seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    pub constant: ConstantRetry,
}

impl RetrySpec {
    pub fn constant(attempts: u32, seconds: u32) -> Self {
        Self {
            constant: ConstantRetry { attempts, seconds },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAfterIf {
    pub expr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_if_stopped: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipIf {
    pub expr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub value: ModuleValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep: Option<InputTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_after_if: Option<StopAfterIf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<SkipIf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowValue {
    pub modules: Vec<Module>,
    pub same_worker: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_module: Option<Box<Module>>,
}

/// A complete compiled flow, ready to push to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: FlowValue,
    pub schema: Value,
}
