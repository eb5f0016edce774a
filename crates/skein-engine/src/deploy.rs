use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use skein_compiler::naming::{flow_path, pick_signature_name, styled_signature_name};
use skein_compiler::{compile_dag, dag_signature};
use skein_core::dag::Dag;
use skein_core::error::{Result, SkeinError};
use skein_core::registry::NodeRegistry;
use skein_core::traits::WorkflowEngine;
use skein_core::types::{GeneratedWorkflow, Style, WorkflowRecord};
use skein_core::validator::{validate_dag, ValidationIssue};

use crate::store::WorkflowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployAction {
    Created,
    Updated,
}

/// What a deploy did to one workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub workflow: WorkflowRecord,
    pub action: DeployAction,
}

/// One workflow in a named batch deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedWorkflowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub dag: Dag,
}

/// Deploy a generated workflow under its content signature.
///
/// The signature makes this idempotent: redeploying an identical DAG updates
/// the existing record instead of minting a second name.
pub async fn deploy_generated(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    registry: &NodeRegistry,
    app_id: &str,
    generated: &GeneratedWorkflow,
    style: Option<&Style>,
) -> Result<DeployOutcome> {
    let signature = dag_signature(&generated.dag)?;

    if let Some(existing) = store.find_by_signature(app_id, &signature)? {
        let plan = compile_dag(&generated.dag, &existing.name, registry)?;

        if let (Some(engine), Some(path)) = (engine, existing.flow_path.as_deref()) {
            let mut flow = plan.to_flow();
            flow.description = Some(generated.description.clone());
            let flow_json = serde_json::to_value(&flow)?;
            if let Err(e) = engine.update_flow(path, flow_json).await {
                warn!(path = %path, error = %e, "Failed to update flow on engine");
            }
        }

        store.update_workflow(&existing.id, Some(&generated.description), &generated.dag)?;
        let workflow = store
            .find_by_signature(app_id, &signature)?
            .ok_or_else(|| SkeinError::NotFound(format!("workflow {}", existing.id)))?;

        info!(
            workflow = %workflow.id,
            name = %workflow.name,
            "Redeploy matched an existing signature"
        );
        return Ok(DeployOutcome {
            workflow,
            action: DeployAction::Updated,
        });
    }

    let used = store.list_signature_names(app_id)?;
    let signature_name = match style {
        Some(style) => styled_signature_name(style.name(), &used),
        None => pick_signature_name(&signature, &used),
    };
    let name = format!(
        "{}-{}-{}-{}",
        generated.category, generated.channel, generated.audience_type, signature_name
    );
    let path = flow_path(app_id, &name);
    let plan = compile_dag(&generated.dag, &name, registry)?;

    if let Some(engine) = engine {
        let flow = plan.to_flow();
        let value = serde_json::to_value(&flow.value)?;
        if let Err(e) = engine
            .create_flow(
                &path,
                &name,
                Some(&generated.description),
                value,
                Some(flow.schema.clone()),
            )
            .await
        {
            warn!(path = %path, error = %e, "Failed to create flow on engine");
        }
    }

    let now = Utc::now();
    let record = WorkflowRecord {
        id: Uuid::new_v4().to_string(),
        app_id: app_id.to_string(),
        name: name.clone(),
        description: Some(generated.description.clone()),
        dag: generated.dag.clone(),
        flow_path: Some(path),
        category: Some(generated.category.clone()),
        channel: Some(generated.channel.clone()),
        audience_type: Some(generated.audience_type.clone()),
        signature: Some(signature.clone()),
        signature_name: Some(signature_name),
        deleted: false,
        created_at: now,
        updated_at: now,
    };
    store.insert_workflow(&record)?;

    // A concurrent deploy of the same DAG may have won the insert; re-read
    // so the returned record is the stored one.
    let workflow = store
        .find_by_signature(app_id, &signature)?
        .unwrap_or(record);

    info!(workflow = %workflow.id, name = %name, "Workflow deployed");
    Ok(DeployOutcome {
        workflow,
        action: DeployAction::Created,
    })
}

/// Batch upsert of named workflows. Every DAG is validated before anything
/// is written; one bad workflow rejects the whole batch.
pub async fn deploy_named(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    registry: &NodeRegistry,
    app_id: &str,
    workflows: &[NamedWorkflowSpec],
) -> Result<Vec<DeployOutcome>> {
    let mut issues = Vec::new();
    for spec in workflows {
        let outcome = validate_dag(&spec.dag, registry);
        for issue in outcome.errors {
            issues.push(ValidationIssue::new(
                format!("{}: {}", spec.name, issue.field),
                issue.message,
            ));
        }
    }
    if !issues.is_empty() {
        return Err(SkeinError::Validation(issues));
    }

    let mut results = Vec::with_capacity(workflows.len());
    for spec in workflows {
        results.push(deploy_one_named(store, engine, registry, app_id, spec).await?);
    }
    Ok(results)
}

async fn deploy_one_named(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    registry: &NodeRegistry,
    app_id: &str,
    spec: &NamedWorkflowSpec,
) -> Result<DeployOutcome> {
    let plan = compile_dag(&spec.dag, &spec.name, registry)?;

    if let Some(existing) = store.find_by_name(app_id, &spec.name)? {
        if let (Some(engine), Some(path)) = (engine, existing.flow_path.as_deref()) {
            let mut flow = plan.to_flow();
            flow.description = spec.description.clone();
            let flow_json = serde_json::to_value(&flow)?;
            if let Err(e) = engine.update_flow(path, flow_json).await {
                warn!(path = %path, error = %e, "Failed to update flow on engine");
            }
        }

        store.update_workflow(&existing.id, spec.description.as_deref(), &spec.dag)?;
        let workflow = store
            .find_workflow(&existing.id)?
            .ok_or_else(|| SkeinError::NotFound(format!("workflow {}", existing.id)))?;
        info!(workflow = %workflow.id, name = %spec.name, "Workflow updated");
        return Ok(DeployOutcome {
            workflow,
            action: DeployAction::Updated,
        });
    }

    let path = flow_path(app_id, &spec.name);
    if let Some(engine) = engine {
        let flow = plan.to_flow();
        let value = serde_json::to_value(&flow.value)?;
        if let Err(e) = engine
            .create_flow(
                &path,
                &spec.name,
                spec.description.as_deref(),
                value,
                Some(flow.schema.clone()),
            )
            .await
        {
            warn!(path = %path, error = %e, "Failed to create flow on engine");
        }
    }

    let now = Utc::now();
    let workflow = WorkflowRecord {
        id: Uuid::new_v4().to_string(),
        app_id: app_id.to_string(),
        name: spec.name.clone(),
        description: spec.description.clone(),
        dag: spec.dag.clone(),
        flow_path: Some(path),
        category: None,
        channel: None,
        audience_type: None,
        signature: None,
        signature_name: None,
        deleted: false,
        created_at: now,
        updated_at: now,
    };
    store.insert_workflow(&workflow)?;
    info!(workflow = %workflow.id, name = %spec.name, "Workflow created");
    Ok(DeployOutcome {
        workflow,
        action: DeployAction::Created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubEngine;
    use serde_json::json;
    use skein_core::dag::{DagEdge, DagNode};

    fn outreach_dag() -> Dag {
        Dag::new(
            vec![
                DagNode::new("find_leads", "lead-service")
                    .with_config("operation", json!("lead-search")),
                DagNode::new("write_email", "content-generation"),
                DagNode::new("send", "outbound-sending"),
            ],
            vec![
                DagEdge::new("find_leads", "write_email"),
                DagEdge::new("write_email", "send"),
            ],
        )
    }

    fn generated(dag: Dag) -> GeneratedWorkflow {
        GeneratedWorkflow {
            dag,
            category: "sales".to_string(),
            channel: "email".to_string(),
            audience_type: "cold-outreach".to_string(),
            description: "Cold email outreach".to_string(),
        }
    }

    fn stub() -> (Arc<StubEngine>, Arc<dyn WorkflowEngine>) {
        let stub = Arc::new(StubEngine::new());
        let as_engine: Arc<dyn WorkflowEngine> = stub.clone();
        (stub, as_engine)
    }

    #[tokio::test]
    async fn generated_deploy_mints_a_dimension_prefixed_name() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();
        let (stub, engine) = stub();

        let outcome = deploy_generated(
            &store,
            Some(&engine),
            &registry,
            "app-1",
            &generated(outreach_dag()),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.action, DeployAction::Created);
        let wf = &outcome.workflow;
        assert!(wf.name.starts_with("sales-email-cold-outreach-"));
        assert_eq!(
            wf.name,
            format!(
                "sales-email-cold-outreach-{}",
                wf.signature_name.as_deref().unwrap()
            )
        );
        assert_eq!(wf.signature.as_deref().map(str::len), Some(64));
        assert!(wf
            .flow_path
            .as_deref()
            .unwrap()
            .starts_with("f/workflows/app-1/"));
        assert!(stub.calls()[0].starts_with("create_flow f/workflows/app-1/"));
    }

    #[tokio::test]
    async fn redeploying_the_same_dag_updates_in_place() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();
        let (stub, engine) = stub();

        let first = deploy_generated(
            &store,
            Some(&engine),
            &registry,
            "app-1",
            &generated(outreach_dag()),
            None,
        )
        .await
        .unwrap();

        let mut again = generated(outreach_dag());
        again.description = "Updated description".to_string();
        let second = deploy_generated(&store, Some(&engine), &registry, "app-1", &again, None)
            .await
            .unwrap();

        assert_eq!(second.action, DeployAction::Updated);
        assert_eq!(second.workflow.id, first.workflow.id);
        assert_eq!(second.workflow.name, first.workflow.name);
        assert_eq!(
            second.workflow.description.as_deref(),
            Some("Updated description")
        );
        assert!(stub.calls().iter().any(|c| c.starts_with("update_flow")));
    }

    #[tokio::test]
    async fn different_dags_get_different_names() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();

        let first = deploy_generated(
            &store,
            None,
            &registry,
            "app-1",
            &generated(outreach_dag()),
            None,
        )
        .await
        .unwrap();

        let mut other_dag = outreach_dag();
        other_dag.nodes[0] = DagNode::new("find_leads", "lead-service")
            .with_config("operation", json!("lead-enrich"));
        let second = deploy_generated(&store, None, &registry, "app-1", &generated(other_dag), None)
            .await
            .unwrap();

        assert_eq!(second.action, DeployAction::Created);
        assert_ne!(first.workflow.signature, second.workflow.signature);
        assert_ne!(first.workflow.name, second.workflow.name);
    }

    #[tokio::test]
    async fn styled_deploys_version_the_style_slug() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();
        let style = Style::Human {
            human_id: "human-1".to_string(),
            name: "Hormozi".to_string(),
        };

        let first = deploy_generated(
            &store,
            None,
            &registry,
            "app-1",
            &generated(outreach_dag()),
            Some(&style),
        )
        .await
        .unwrap();
        assert_eq!(first.workflow.signature_name.as_deref(), Some("hormozi-v1"));
        assert_eq!(
            first.workflow.name,
            "sales-email-cold-outreach-hormozi-v1"
        );

        let mut other_dag = outreach_dag();
        other_dag.nodes.push(DagNode::new("pause", "wait"));
        other_dag
            .edges
            .push(DagEdge::new("send", "pause"));
        let second = deploy_generated(
            &store,
            None,
            &registry,
            "app-1",
            &generated(other_dag),
            Some(&style),
        )
        .await
        .unwrap();
        assert_eq!(
            second.workflow.signature_name.as_deref(),
            Some("hormozi-v2")
        );
    }

    #[tokio::test]
    async fn degraded_mode_stores_without_engine_calls() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();

        let outcome = deploy_generated(
            &store,
            None,
            &registry,
            "app-1",
            &generated(outreach_dag()),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.action, DeployAction::Created);
        assert!(store
            .find_workflow(&outcome.workflow.id)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn engine_create_failure_still_stores_the_workflow() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();
        let failing: Arc<dyn WorkflowEngine> = Arc::new(StubEngine::failing());

        let outcome = deploy_generated(
            &store,
            Some(&failing),
            &registry,
            "app-1",
            &generated(outreach_dag()),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.action, DeployAction::Created);
        assert!(store
            .find_by_name("app-1", &outcome.workflow.name)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn named_batch_rejects_on_any_invalid_dag() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();

        let bad_dag = Dag::new(vec![DagNode::new("mystery", "not-a-type")], vec![]);
        let specs = vec![
            NamedWorkflowSpec {
                name: "good-flow".to_string(),
                description: None,
                dag: outreach_dag(),
            },
            NamedWorkflowSpec {
                name: "bad-flow".to_string(),
                description: None,
                dag: bad_dag,
            },
        ];

        let err = deploy_named(&store, None, &registry, "app-1", &specs)
            .await
            .unwrap_err();
        match err {
            SkeinError::Validation(issues) => {
                assert!(issues.iter().all(|i| i.field.starts_with("bad-flow:")));
            }
            other => panic!("expected validation error, got {other}"),
        }
        // Nothing from the batch landed.
        assert!(store.find_by_name("app-1", "good-flow").unwrap().is_none());
    }

    #[tokio::test]
    async fn named_deploys_upsert_by_name() {
        let store = WorkflowStore::in_memory().unwrap();
        let registry = NodeRegistry::with_builtins();
        let (stub, engine) = stub();

        let spec = NamedWorkflowSpec {
            name: "weekly-digest".to_string(),
            description: Some("first version".to_string()),
            dag: outreach_dag(),
        };
        let first = deploy_named(&store, Some(&engine), &registry, "app-1", &[spec.clone()])
            .await
            .unwrap();
        assert_eq!(first[0].action, DeployAction::Created);
        assert_eq!(
            first[0].workflow.flow_path.as_deref(),
            Some("f/workflows/app-1/weekly_digest")
        );

        let mut updated = spec;
        updated.description = Some("second version".to_string());
        let second = deploy_named(&store, Some(&engine), &registry, "app-1", &[updated])
            .await
            .unwrap();
        assert_eq!(second[0].action, DeployAction::Updated);
        assert_eq!(second[0].workflow.id, first[0].workflow.id);
        assert_eq!(
            second[0].workflow.description.as_deref(),
            Some("second version")
        );

        let calls = stub.calls();
        assert!(calls[0].starts_with("create_flow"));
        assert!(calls[1].starts_with("update_flow"));
    }
}
