use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dag::Dag;
use crate::registry::NodeRegistry;

/// One structural problem found in a DAG, addressed to the field it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result of structural validation. Errors accumulate; callers decide whether
/// to reject, surface, or feed them back into a generation retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

/// Check a DAG for structural problems. Pure: no side effects, no
/// short-circuiting between checks.
pub fn validate_dag(dag: &Dag, registry: &NodeRegistry) -> ValidationOutcome {
    let mut errors = Vec::new();

    // Duplicate node ids
    let mut seen = HashSet::new();
    for node in &dag.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationIssue::new(
                "nodes",
                format!("Duplicate node ID: \"{}\"", node.id),
            ));
        }
    }

    // Unknown node types
    for node in &dag.nodes {
        if !registry.is_known(&node.node_type) {
            errors.push(ValidationIssue::new(
                format!("nodes[{}].type", node.id),
                format!("Unknown node type: \"{}\"", node.node_type),
            ));
        }
    }

    // Edge endpoints must exist
    let ids: HashSet<&str> = dag.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &dag.edges {
        if !ids.contains(edge.from.as_str()) {
            errors.push(ValidationIssue::new(
                "edges",
                format!("Edge references unknown source node: \"{}\"", edge.from),
            ));
        }
        if !ids.contains(edge.to.as_str()) {
            errors.push(ValidationIssue::new(
                "edges",
                format!("Edge references unknown target node: \"{}\"", edge.to),
            ));
        }
    }

    // Cycles
    if has_cycle(dag) {
        errors.push(ValidationIssue::new("edges", "Workflow contains a cycle"));
    }

    // $ref targets must exist (flow_input refs are resolved at run time)
    for node in &dag.nodes {
        for (key, value) in &node.input_mapping {
            let Some(reference) = value.as_str().and_then(|s| s.strip_prefix("$ref:")) else {
                continue;
            };
            if reference.starts_with("flow_input") {
                continue;
            }
            let target = reference.split('.').next().unwrap_or(reference);
            if !ids.contains(target) {
                errors.push(ValidationIssue::new(
                    format!("nodes[{}].inputMapping.{}", node.id, key),
                    format!("References unknown node: \"{}\"", target),
                ));
            }
        }
    }

    // At least one entry point
    if !dag.nodes.is_empty() {
        let has_incoming: HashSet<&str> = dag.edges.iter().map(|e| e.to.as_str()).collect();
        if dag.nodes.iter().all(|n| has_incoming.contains(n.id.as_str())) {
            errors.push(ValidationIssue::new(
                "nodes",
                "No entry node found (all nodes have incoming edges)",
            ));
        }
    }

    // The failure handler must be a real node
    if let Some(on_error) = &dag.on_error {
        if !ids.contains(on_error.as_str()) {
            errors.push(ValidationIssue::new(
                "onError",
                format!("onError references unknown node: \"{}\"", on_error),
            ));
        }
    }

    ValidationOutcome {
        valid: errors.is_empty(),
        errors,
    }
}

/// Depth-first search with an on-stack set; a back-edge to a node currently
/// on the stack is a cycle.
fn has_cycle(dag: &Dag) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &dag.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if in_stack.contains(node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        in_stack.insert(node);
        if let Some(targets) = adjacency.get(node) {
            for next in targets {
                if visit(next, adjacency, visited, in_stack) {
                    return true;
                }
            }
        }
        in_stack.remove(node);
        false
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    dag.nodes
        .iter()
        .any(|n| visit(n.id.as_str(), &adjacency, &mut visited, &mut in_stack))
}
