use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step in a workflow DAG: either a call to an executable script or a
/// native control construct (`wait`, `condition`, `for-each`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Static configuration values for the step.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Literal values or `$ref:` strings resolved at compile time.
    #[serde(default)]
    pub input_mapping: Map<String, Value>,
    /// Overrides the default retry count for this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl DagNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Map::new(),
            input_mapping: Map::new(),
            retries: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_mapping(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input_mapping.insert(key.into(), value);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// A directed edge between two nodes. `condition` is present only on edges
/// leaving a branching node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl DagEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition.into()),
        }
    }
}

/// The author-facing workflow definition. Node order is meaningful: it breaks
/// ties in the topological sort, so two DAGs with reordered node lists are
/// distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dag {
    pub nodes: Vec<DagNode>,
    #[serde(default)]
    pub edges: Vec<DagEdge>,
    /// Designated failure handler, compiled outside the main sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
}

impl Dag {
    pub fn new(nodes: Vec<DagNode>, edges: Vec<DagEdge>) -> Self {
        Self {
            nodes,
            edges,
            on_error: None,
        }
    }

    pub fn with_on_error(mut self, node_id: impl Into<String>) -> Self {
        self.on_error = Some(node_id.into());
        self
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}
