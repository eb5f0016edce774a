//! Lowering from a workflow DAG to an [`ExecutionPlan`].
//!
//! The input graph is flat: branch arms and loop bodies are ordinary nodes
//! wired with edges. The engine wants nested containers instead, so the
//! compiler reconstructs those scopes from edge shape before emitting
//! modules.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use skein_core::{Dag, DagEdge, DagNode, NodeRegistry, Result, SkeinError};
use tracing::debug;

use crate::mapping::{build_input_transforms, normalize_id};
use crate::plan::{BranchPlan, ExecutionPlan, InputField, ModulePlan, PlanKind, RetryPolicy};
use crate::wire::InputTransform;

/// Retry attempts for script steps that carry no override.
const DEFAULT_RETRIES: u32 = 3;
/// Pause between retry attempts, in seconds.
const RETRY_BACKOFF_SECONDS: u32 = 5;

/// Compile a DAG into an execution plan titled `name`.
///
/// Expects a graph the validator has already accepted. Malformed input still
/// never panics: unknown edge endpoints and cycle members simply drop out of
/// the module list.
pub fn compile_dag(dag: &Dag, name: &str, registry: &NodeRegistry) -> Result<ExecutionPlan> {
    let ordered = topological_sort(&dag.nodes, &dag.edges);
    let main_nodes: Vec<&DagNode> = match dag.on_error.as_deref() {
        Some(handler) => ordered.into_iter().filter(|n| n.id != handler).collect(),
        None => ordered,
    };

    let modules = build_modules(&main_nodes, dag, registry)?;

    let failure_module = dag
        .on_error
        .as_deref()
        .and_then(|id| dag.nodes.iter().find(|n| n.id == id))
        .and_then(|node| failure_plan(node, registry));

    debug!(
        nodes = dag.nodes.len(),
        modules = modules.len(),
        has_failure_module = failure_module.is_some(),
        "DAG compiled"
    );

    Ok(ExecutionPlan {
        summary: name.to_string(),
        modules,
        failure_module,
        inputs: infer_inputs(dag),
    })
}

/// Kahn's algorithm. Ties break in node-list order, which makes the output
/// (and everything derived from it, including the DAG signature) stable for
/// a given definition.
fn topological_sort<'a>(nodes: &'a [DagNode], edges: &[DagEdge]) -> Vec<&'a DagNode> {
    let node_map: HashMap<&str, &DagNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut adjacency: HashMap<&str, Vec<&str>> = nodes
        .iter()
        .map(|n| (n.id.as_str(), Vec::new()))
        .collect();
    let mut in_degree: HashMap<&str, i64> =
        nodes.iter().map(|n| (n.id.as_str(), 0)).collect();

    for edge in edges {
        if let Some(targets) = adjacency.get_mut(edge.from.as_str()) {
            targets.push(edge.to.as_str());
        }
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .filter(|n| in_degree.get(n.id.as_str()).copied().unwrap_or(0) == 0)
        .map(|n| n.id.as_str())
        .collect();

    let mut sorted: Vec<&str> = Vec::new();
    while let Some(current) = queue.pop_front() {
        sorted.push(current);
        if let Some(neighbors) = adjacency.get(current) {
            for &neighbor in neighbors {
                let degree = in_degree.entry(neighbor).or_insert(1);
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(neighbor);
                }
            }
        }
    }

    // Cycle members never reach degree zero and fall out here; the validator
    // reports the cycle separately.
    sorted
        .into_iter()
        .filter_map(|id| node_map.get(id).copied())
        .collect()
}

fn incoming_edges(dag: &Dag) -> HashMap<&str, Vec<&DagEdge>> {
    let mut incoming: HashMap<&str, Vec<&DagEdge>> = dag
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Vec::new()))
        .collect();
    for edge in &dag.edges {
        if let Some(list) = incoming.get_mut(edge.to.as_str()) {
            list.push(edge);
        }
    }
    incoming
}

/// Branch membership for one condition node.
struct BranchScopes {
    /// Condition expression with its member node ids, in first-seen edge
    /// order.
    branches: Vec<(String, HashSet<String>)>,
    /// Targets of the condition's unconditional out-edges. These are where
    /// the branches reconverge and stay in the outer sequence.
    after: HashSet<String>,
}

/// Reconstruct which nodes belong inside each arm of a condition node.
///
/// A node joins an arm if it is a direct conditional target, or if every one
/// of its incoming edges comes from a node already in the arm. Walking in
/// topological order makes one pass sufficient.
fn collect_branch_nodes(
    condition_id: &str,
    dag: &Dag,
    ordered: &[&DagNode],
    incoming: &HashMap<&str, Vec<&DagEdge>>,
) -> BranchScopes {
    let out_edges: Vec<&DagEdge> = dag
        .edges
        .iter()
        .filter(|e| e.from == condition_id)
        .collect();

    let after: HashSet<String> = out_edges
        .iter()
        .filter(|e| e.condition.is_none())
        .map(|e| e.to.clone())
        .collect();

    let mut roots_by_expr: Vec<(String, HashSet<String>)> = Vec::new();
    for edge in &out_edges {
        let Some(expr) = edge.condition.as_deref() else {
            continue;
        };
        match roots_by_expr.iter_mut().find(|(e, _)| e == expr) {
            Some((_, roots)) => {
                roots.insert(edge.to.clone());
            }
            None => roots_by_expr.push((expr.to_string(), HashSet::from([edge.to.clone()]))),
        }
    }

    let mut branches = Vec::new();
    for (expr, roots) in roots_by_expr {
        let mut members: HashSet<String> = HashSet::new();
        for node in ordered {
            if after.contains(node.id.as_str()) || node.id == condition_id {
                continue;
            }
            if roots.contains(node.id.as_str()) {
                members.insert(node.id.clone());
                continue;
            }
            if members.contains(node.id.as_str()) {
                continue;
            }
            let Some(inputs) = incoming.get(node.id.as_str()) else {
                continue;
            };
            if inputs.is_empty() {
                continue;
            }
            if inputs.iter().all(|e| members.contains(e.from.as_str())) {
                members.insert(node.id.clone());
            }
        }
        branches.push((expr, members));
    }

    BranchScopes { branches, after }
}

/// Reconstruct the body of a for-each node: its direct targets plus any node
/// fed exclusively by the loop or by other body members.
fn collect_loop_body_nodes(
    loop_id: &str,
    dag: &Dag,
    ordered: &[&DagNode],
    incoming: &HashMap<&str, Vec<&DagEdge>>,
) -> HashSet<String> {
    let direct_targets: HashSet<&str> = dag
        .edges
        .iter()
        .filter(|e| e.from == loop_id)
        .map(|e| e.to.as_str())
        .collect();

    let mut body: HashSet<String> = HashSet::new();
    for node in ordered {
        if node.id == loop_id {
            continue;
        }
        if direct_targets.contains(node.id.as_str()) {
            body.insert(node.id.clone());
            continue;
        }
        if body.contains(node.id.as_str()) {
            continue;
        }
        let Some(inputs) = incoming.get(node.id.as_str()) else {
            continue;
        };
        if inputs.is_empty() {
            continue;
        }
        if inputs
            .iter()
            .all(|e| e.from == loop_id || body.contains(e.from.as_str()))
        {
            body.insert(node.id.clone());
        }
    }
    body
}

fn build_modules(
    ordered: &[&DagNode],
    dag: &Dag,
    registry: &NodeRegistry,
) -> Result<Vec<ModulePlan>> {
    let incoming = incoming_edges(dag);

    // First pass: work out which nodes are swallowed by a container so the
    // main sequence can skip them.
    let mut branch_scopes: HashMap<String, BranchScopes> = HashMap::new();
    let mut loop_bodies: HashMap<String, HashSet<String>> = HashMap::new();
    let mut consumed: HashSet<String> = HashSet::new();

    for node in ordered {
        match node.node_type.as_str() {
            "condition" => {
                let scopes = collect_branch_nodes(&node.id, dag, ordered, &incoming);
                for (_, members) in &scopes.branches {
                    consumed.extend(members.iter().cloned());
                }
                branch_scopes.insert(node.id.clone(), scopes);
            }
            "for-each" => {
                let body = collect_loop_body_nodes(&node.id, dag, ordered, &incoming);
                consumed.extend(body.iter().cloned());
                loop_bodies.insert(node.id.clone(), body);
            }
            _ => {}
        }
    }

    let mut modules = Vec::new();
    for node in ordered {
        if consumed.contains(node.id.as_str()) {
            continue;
        }
        match node.node_type.as_str() {
            "condition" => {
                let Some(scopes) = branch_scopes.get(node.id.as_str()) else {
                    continue;
                };
                modules.push(build_condition_plan(node, dag, ordered, scopes, registry)?);
            }
            "for-each" => {
                let Some(body) = loop_bodies.get(node.id.as_str()) else {
                    continue;
                };
                modules.push(build_loop_plan(node, ordered, body, registry)?);
            }
            _ => {
                if let Some(plan) = node_to_plan(node, registry)? {
                    modules.push(plan);
                }
            }
        }
    }

    Ok(modules)
}

fn build_condition_plan(
    node: &DagNode,
    dag: &Dag,
    ordered: &[&DagNode],
    scopes: &BranchScopes,
    registry: &NodeRegistry,
) -> Result<ModulePlan> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut branches = Vec::new();

    for edge in dag.edges.iter().filter(|e| e.from == node.id) {
        let Some(expr) = edge.condition.as_deref() else {
            continue;
        };
        if !seen.insert(expr) {
            continue;
        }

        let members = scopes
            .branches
            .iter()
            .find(|(e, _)| e == expr)
            .map(|(_, m)| m);
        let mut body = Vec::new();
        for candidate in ordered {
            let in_branch = members.map_or(false, |m| m.contains(candidate.id.as_str()));
            if !in_branch {
                continue;
            }
            if let Some(plan) = node_to_plan(candidate, registry)? {
                body.push(plan);
            }
        }
        branches.push(BranchPlan {
            expr: expr.to_string(),
            body,
        });
    }

    Ok(ModulePlan {
        id: normalize_id(&node.id),
        summary: Some("Branch".to_string()),
        kind: PlanKind::Branch { branches },
        retry: None,
        stop_after_expr: None,
        skip_if_expr: None,
    })
}

fn build_loop_plan(
    node: &DagNode,
    ordered: &[&DagNode],
    body_ids: &HashSet<String>,
    registry: &NodeRegistry,
) -> Result<ModulePlan> {
    let mut body = Vec::new();
    for candidate in ordered {
        if !body_ids.contains(candidate.id.as_str()) {
            continue;
        }
        if let Some(plan) = node_to_plan(candidate, registry)? {
            body.push(plan);
        }
    }

    let iterator_expr = node
        .config
        .get("iterator")
        .and_then(Value::as_str)
        .unwrap_or("flow_input.items")
        .to_string();

    Ok(ModulePlan {
        id: normalize_id(&node.id),
        summary: Some("For each".to_string()),
        kind: PlanKind::Loop {
            iterator_expr,
            parallel: node
                .config
                .get("parallel")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            skip_failures: node
                .config
                .get("skipFailures")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            body,
        },
        retry: None,
        stop_after_expr: None,
        skip_if_expr: None,
    })
}

/// Compile a single non-container node. Returns `None` for native nodes that
/// only exist as containers; errors on executable types with no registered
/// script.
fn node_to_plan(node: &DagNode, registry: &NodeRegistry) -> Result<Option<ModulePlan>> {
    let module_id = normalize_id(&node.id);

    if node.node_type == "wait" {
        let seconds = node
            .config
            .get("seconds")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        return Ok(Some(ModulePlan {
            id: module_id,
            summary: Some(format!("Wait {seconds}s")),
            kind: PlanKind::Sleep { seconds },
            retry: None,
            stop_after_expr: None,
            skip_if_expr: None,
        }));
    }

    let Some(path) = registry.script_path(&node.node_type) else {
        if registry.is_native(&node.node_type) {
            return Ok(None);
        }
        return Err(SkeinError::Compilation(format!(
            "No script path for node type: {}",
            node.node_type
        )));
    };

    let retries = node
        .retries
        .or_else(|| {
            node.config
                .get("retries")
                .and_then(Value::as_u64)
                .map(|n| n as u32)
        })
        .unwrap_or(DEFAULT_RETRIES);

    let stop_after_expr = node
        .config
        .get("stopAfterIf")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let skip_if_expr = node
        .config
        .get("skipIf")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    // Flow directives must not leak into the script's own parameters.
    let mut script_config = node.config.clone();
    script_config.remove("retries");
    script_config.remove("stopAfterIf");
    script_config.remove("skipIf");

    let mut params = build_input_transforms(&script_config, &node.input_mapping);
    params
        .entry("appId".to_string())
        .or_insert_with(|| InputTransform::javascript("flow_input.appId"));
    params
        .entry("serviceEnvs".to_string())
        .or_insert_with(|| InputTransform::javascript("flow_input.serviceEnvs"));

    let retry = if retries > 0 {
        RetryPolicy {
            attempts: retries,
            seconds: RETRY_BACKOFF_SECONDS,
        }
    } else {
        // An explicit zero still serializes, overriding any engine default.
        RetryPolicy {
            attempts: 0,
            seconds: 0,
        }
    };

    Ok(Some(ModulePlan {
        id: module_id,
        summary: Some(format!("{}: {}", node.node_type, node.id)),
        kind: PlanKind::Script {
            path: path.to_string(),
            params,
        },
        retry: Some(retry),
        stop_after_expr,
        skip_if_expr,
    }))
}

/// Build the failure handler module. The handler keeps its full config and
/// carries no retry directive; it gains the failing step's id and error
/// message as extra params. Native handlers have no module form and yield
/// `None`.
fn failure_plan(node: &DagNode, registry: &NodeRegistry) -> Option<ModulePlan> {
    let path = registry.script_path(&node.node_type)?;

    let mut params = build_input_transforms(&node.config, &node.input_mapping);
    params
        .entry("appId".to_string())
        .or_insert_with(|| InputTransform::javascript("flow_input.appId"));
    params
        .entry("serviceEnvs".to_string())
        .or_insert_with(|| InputTransform::javascript("flow_input.serviceEnvs"));
    params.insert(
        "failedNodeId".to_string(),
        InputTransform::javascript("error.failed_step"),
    );
    params.insert(
        "errorMessage".to_string(),
        InputTransform::javascript("error.message"),
    );

    Some(ModulePlan {
        id: normalize_id(&node.id),
        summary: Some(format!("onError: {}", node.id)),
        kind: PlanKind::Script {
            path: path.to_string(),
            params,
        },
        retry: None,
        stop_after_expr: None,
        skip_if_expr: None,
    })
}

/// Scan every node's input mapping for `$ref:flow_input.<field>` references
/// and declare each first segment as a run input, after the two context
/// fields every flow declares.
fn infer_inputs(dag: &Dag) -> Vec<InputField> {
    let mut inputs = vec![
        InputField {
            name: "appId".to_string(),
            schema_type: "string".to_string(),
            description: Some("Application identifier".to_string()),
        },
        InputField {
            name: "serviceEnvs".to_string(),
            schema_type: "object".to_string(),
            description: Some("Service URLs and API keys injected by skein".to_string()),
        },
    ];

    for node in &dag.nodes {
        for value in node.input_mapping.values() {
            let Some(reference) = value.as_str() else {
                continue;
            };
            let Some(rest) = reference.strip_prefix("$ref:flow_input.") else {
                continue;
            };
            let field = rest.split('.').next().unwrap_or("");
            if field.is_empty() || inputs.iter().any(|i| i.name == field) {
                continue;
            }
            inputs.push(InputField::string(field));
        }
    }

    inputs
}
