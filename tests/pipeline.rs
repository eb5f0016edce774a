//! Cross-crate pipeline tests: an authored DAG travels through validation,
//! compilation, signing, deployment, and the run lifecycle against a real
//! SQLite file and an in-process engine double.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use skein_compiler::{compile_dag, dag_signature, PlanKind};
use skein_core::config::PollerConfig;
use skein_core::traits::WorkflowEngine;
use skein_core::validator::validate_dag;
use skein_core::{
    Dag, DagEdge, DagNode, GeneratedWorkflow, JobStatus, NodeRegistry, Result, RunStatus,
    SkeinError,
};
use skein_engine::{deploy_generated, deploy_named, runs, DeployAction, JobPoller, WorkflowStore};

/// Engine double that records calls and serves scripted job statuses.
struct RecordingEngine {
    jobs: Mutex<HashMap<String, JobStatus>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn set_job(&self, job: JobStatus) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl WorkflowEngine for RecordingEngine {
    fn create_flow(
        &self,
        path: &str,
        _summary: &str,
        _description: Option<&str>,
        _value: Value,
        _schema: Option<Value>,
    ) -> BoxFuture<'_, Result<String>> {
        let path = path.to_string();
        self.record(format!("create_flow {}", path));
        Box::pin(async move { Ok(path) })
    }

    fn update_flow(&self, path: &str, _flow: Value) -> BoxFuture<'_, Result<()>> {
        self.record(format!("update_flow {}", path));
        Box::pin(async move { Ok(()) })
    }

    fn delete_flow(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        self.record(format!("delete_flow {}", path));
        Box::pin(async move { Ok(()) })
    }

    fn run_flow(&self, path: &str, _args: Value) -> BoxFuture<'_, Result<String>> {
        self.record(format!("run_flow {}", path));
        Box::pin(async move { Ok("job-pipeline-1".to_string()) })
    }

    fn get_job(&self, job_id: &str) -> BoxFuture<'_, Result<JobStatus>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            self.jobs
                .lock()
                .unwrap()
                .get(&job_id)
                .cloned()
                .ok_or_else(|| SkeinError::Engine(format!("no such job: {}", job_id)))
        })
    }

    fn cancel_job(&self, job_id: &str, reason: &str) -> BoxFuture<'_, Result<()>> {
        self.record(format!("cancel_job {} ({})", job_id, reason));
        Box::pin(async move { Ok(()) })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(true) })
    }
}

/// A cold-outreach campaign chassis: gate check, run bookkeeping, the
/// lead/content/send chain, and an error reporter.
fn campaign_dag() -> Dag {
    Dag::new(
        vec![
            DagNode::new("gate-check", "http.call")
                .with_config("service", json!("campaign"))
                .with_config("method", json!("POST"))
                .with_config("path", json!("/gate-check"))
                .with_config("stopAfterIf", json!("!result.ok"))
                .with_mapping("body.campaignId", json!("$ref:flow_input.campaignId")),
            DagNode::new("start-run", "http.call")
                .with_config("service", json!("campaign"))
                .with_config("method", json!("POST"))
                .with_config("path", json!("/runs/start"))
                .with_mapping("body.campaignId", json!("$ref:flow_input.campaignId")),
            DagNode::new("fetch-lead", "lead-service")
                .with_config("operation", json!("getNextFromBuffer"))
                .with_mapping("campaignId", json!("$ref:flow_input.campaignId")),
            DagNode::new("write-email", "content-generation")
                .with_mapping("lead", json!("$ref:fetch-lead.output.lead"))
                .with_retries(2),
            DagNode::new("send-email", "outbound-sending")
                .with_mapping("draft", json!("$ref:write-email.output.draft")),
            DagNode::new("end-run", "http.call")
                .with_config("service", json!("campaign"))
                .with_config("method", json!("POST"))
                .with_config("path", json!("/runs/end")),
            DagNode::new("end-run-error", "http.call")
                .with_config("service", json!("campaign"))
                .with_config("method", json!("POST"))
                .with_config("path", json!("/runs/end"))
                .with_config("body", json!({"status": "error"})),
        ],
        vec![
            DagEdge::new("gate-check", "start-run"),
            DagEdge::new("start-run", "fetch-lead"),
            DagEdge::new("fetch-lead", "write-email"),
            DagEdge::new("write-email", "send-email"),
            DagEdge::new("send-email", "end-run"),
        ],
    )
    .with_on_error("end-run-error")
}

fn generated_campaign() -> GeneratedWorkflow {
    GeneratedWorkflow {
        dag: campaign_dag(),
        category: "sales".to_string(),
        channel: "email".to_string(),
        audience_type: "cold-outreach".to_string(),
        description: "Cold outreach email campaign".to_string(),
    }
}

fn temp_store() -> (tempfile::TempDir, Arc<WorkflowStore>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = WorkflowStore::open(&dir.path().join("skein.db")).expect("open store");
    (dir, Arc::new(store))
}

#[test]
fn campaign_dag_validates_compiles_and_signs() {
    let registry = NodeRegistry::with_builtins();
    let dag = campaign_dag();

    let outcome = validate_dag(&dag, &registry);
    assert!(outcome.valid, "unexpected issues: {:?}", outcome.errors);

    let plan = compile_dag(&dag, "sales-email-cold-outreach", &registry).expect("compile");

    let ids: Vec<&str> = plan.modules.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "gate_check",
            "start_run",
            "fetch_lead",
            "write_email",
            "send_email",
            "end_run"
        ]
    );

    // The gate's stop directive is lifted out of its script params.
    let gate = &plan.modules[0];
    assert_eq!(gate.stop_after_expr.as_deref(), Some("!result.ok"));
    let PlanKind::Script { params, .. } = &gate.kind else {
        panic!("expected script module");
    };
    assert!(!params.contains_key("stopAfterIf"));

    assert_eq!(plan.modules[3].retry.as_ref().map(|r| r.attempts), Some(2));

    let failure = plan.failure_module.as_ref().expect("failure module");
    assert_eq!(failure.id, "end_run_error");

    let input_names: Vec<&str> = plan.inputs.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(input_names, vec!["appId", "serviceEnvs", "campaignId"]);

    let signature = dag_signature(&dag).expect("signature");
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(signature, dag_signature(&campaign_dag()).unwrap());

    let mut reordered = campaign_dag();
    reordered.nodes.swap(2, 3);
    assert_ne!(signature, dag_signature(&reordered).unwrap());
}

#[tokio::test]
async fn generated_deploy_persists_and_pushes_the_flow() {
    let (_dir, store) = temp_store();
    let registry = NodeRegistry::with_builtins();
    let engine = RecordingEngine::new();
    let as_engine: Arc<dyn WorkflowEngine> = engine.clone();

    let outcome = deploy_generated(
        &store,
        Some(&as_engine),
        &registry,
        "acme",
        &generated_campaign(),
        None,
    )
    .await
    .expect("deploy");

    assert_eq!(outcome.action, DeployAction::Created);
    let workflow = &outcome.workflow;
    assert!(workflow.name.starts_with("sales-email-cold-outreach-"));
    assert_eq!(workflow.app_id, "acme");
    assert_eq!(workflow.signature.as_deref().map(str::len), Some(64));
    assert!(workflow.signature_name.is_some());
    assert_eq!(
        workflow.flow_path.as_deref(),
        Some(format!("f/workflows/acme/{}", workflow.name).as_str())
    );

    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("create_flow f/workflows/acme/"));

    // Same DAG again: the signature matches, so the deploy updates in place.
    let second = deploy_generated(
        &store,
        Some(&as_engine),
        &registry,
        "acme",
        &generated_campaign(),
        None,
    )
    .await
    .expect("redeploy");
    assert_eq!(second.action, DeployAction::Updated);
    assert_eq!(second.workflow.id, workflow.id);
    assert_eq!(second.workflow.name, workflow.name);
    assert!(engine.calls().iter().any(|c| c.starts_with("update_flow")));
}

#[tokio::test]
async fn run_lifecycle_reaches_a_terminal_state_via_the_poller() {
    let (_dir, store) = temp_store();
    let registry = NodeRegistry::with_builtins();
    let engine = RecordingEngine::new();
    let as_engine: Arc<dyn WorkflowEngine> = engine.clone();

    let deployed = deploy_generated(
        &store,
        Some(&as_engine),
        &registry,
        "acme",
        &generated_campaign(),
        None,
    )
    .await
    .expect("deploy")
    .workflow;

    let run = runs::execute_by_name(
        &store,
        Some(&as_engine),
        "acme",
        &deployed.name,
        json!({"campaignId": "c-42"}),
    )
    .await
    .expect("execute");

    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.external_job_id.as_deref(), Some("job-pipeline-1"));
    assert_eq!(run.inputs, json!({"campaignId": "c-42"}));

    let poller = JobPoller::new(
        store.clone(),
        engine.clone(),
        &PollerConfig { interval_secs: 1 },
        CancellationToken::new(),
    );

    engine.set_job(JobStatus {
        id: "job-pipeline-1".into(),
        running: true,
        success: None,
        result: None,
        canceled: None,
    });
    poller.tick().await;
    let running = store.get_run(&run.id).unwrap().unwrap();
    assert_eq!(running.status, RunStatus::Running);
    assert!(running.started_at.is_some());

    engine.set_job(JobStatus {
        id: "job-pipeline-1".into(),
        running: false,
        success: Some(true),
        result: Some(json!({"sent": 1})),
        canceled: None,
    });
    poller.tick().await;
    let finished = store.get_run(&run.id).unwrap().unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.result, Some(json!({"sent": 1})));
    assert!(finished.completed_at.is_some());

    assert!(store.list_active_runs().unwrap().is_empty());

    // Terminal runs refuse cancellation.
    let err = runs::cancel_run(&store, Some(&as_engine), &run.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SkeinError::InvalidTransition(_)));
}

#[tokio::test]
async fn an_active_run_cancels_cleanly() {
    let (_dir, store) = temp_store();
    let registry = NodeRegistry::with_builtins();
    let engine = RecordingEngine::new();
    let as_engine: Arc<dyn WorkflowEngine> = engine.clone();

    let deployed = deploy_generated(
        &store,
        Some(&as_engine),
        &registry,
        "acme",
        &generated_campaign(),
        None,
    )
    .await
    .expect("deploy")
    .workflow;

    let run = runs::execute_by_name(&store, Some(&as_engine), "acme", &deployed.name, json!({}))
        .await
        .expect("execute");

    let cancelled = runs::cancel_run(&store, Some(&as_engine), &run.id)
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert!(engine
        .calls()
        .iter()
        .any(|c| c == "cancel_job job-pipeline-1 (Cancelled by user)"));
}

#[tokio::test]
async fn degraded_mode_still_deploys_and_records_runs() {
    let (_dir, store) = temp_store();
    let registry = NodeRegistry::with_builtins();

    let deployed = deploy_generated(&store, None, &registry, "acme", &generated_campaign(), None)
        .await
        .expect("deploy")
        .workflow;

    let run = runs::execute_by_name(&store, None, "acme", &deployed.name, json!({}))
        .await
        .expect("execute");
    assert_eq!(run.status, RunStatus::Queued);
    assert!(run.external_job_id.is_none());
}

#[tokio::test]
async fn named_batch_deploy_rejects_invalid_dags_atomically() {
    let (_dir, store) = temp_store();
    let registry = NodeRegistry::with_builtins();

    let good = skein_engine::NamedWorkflowSpec {
        name: "welcome".to_string(),
        description: None,
        dag: Dag::new(vec![DagNode::new("send", "lifecycle-emails")], vec![]),
    };
    let bad = skein_engine::NamedWorkflowSpec {
        name: "broken".to_string(),
        description: None,
        dag: Dag::new(vec![DagNode::new("step", "unknown-type-xyz")], vec![]),
    };

    let err = deploy_named(&store, None, &registry, "acme", &[good.clone(), bad])
        .await
        .unwrap_err();
    let SkeinError::Validation(issues) = err else {
        panic!("expected validation error");
    };
    assert!(issues.iter().all(|i| i.field.starts_with("broken:")));

    // Nothing from the batch landed, including the valid workflow.
    assert!(store.find_by_name("acme", "welcome").unwrap().is_none());

    let outcomes = deploy_named(&store, None, &registry, "acme", &[good])
        .await
        .expect("deploy valid batch");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, DeployAction::Created);
}
