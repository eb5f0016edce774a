use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use skein_core::config::collect_service_envs;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::WorkflowEngine;
use skein_core::types::{RunStatus, WorkflowRecord, WorkflowRun};

use crate::poller::reconcile_run;
use crate::store::WorkflowStore;

/// Start a run for a workflow looked up by id.
pub async fn execute(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    workflow_id: &str,
    inputs: Value,
) -> Result<WorkflowRun> {
    let workflow = store
        .find_workflow(workflow_id)?
        .ok_or_else(|| SkeinError::NotFound(format!("workflow {}", workflow_id)))?;
    start_run(store, engine, &workflow, inputs).await
}

/// Start a run for a workflow looked up by `(app_id, name)`.
pub async fn execute_by_name(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    app_id: &str,
    name: &str,
    inputs: Value,
) -> Result<WorkflowRun> {
    let workflow = store.find_by_name(app_id, name)?.ok_or_else(|| {
        SkeinError::NotFound(format!(
            "workflow \"{}\" not found for app \"{}\"",
            name, app_id
        ))
    })?;
    start_run(store, engine, &workflow, inputs).await
}

async fn start_run(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    workflow: &WorkflowRecord,
    inputs: Value,
) -> Result<WorkflowRun> {
    let external_job_id = match engine {
        Some(engine) => {
            let path = workflow
                .flow_path
                .as_deref()
                .ok_or_else(|| SkeinError::Engine("Workflow has no flow path".into()))?;
            let args = engine_args(&inputs, &workflow.app_id);
            Some(engine.run_flow(path, args).await?)
        }
        None => None,
    };

    // The stored inputs are the caller's; the injected context only travels
    // to the engine.
    let run = WorkflowRun::queued(&workflow.id, external_job_id, inputs);
    store.insert_run(&run)?;
    info!(run = %run.id, workflow = %workflow.id, "Run queued");
    Ok(run)
}

/// Run arguments sent to the engine: caller inputs plus the injected
/// `appId` and `serviceEnvs` context.
fn engine_args(inputs: &Value, app_id: &str) -> Value {
    let mut args = match inputs {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    args.insert("appId".to_string(), Value::String(app_id.to_string()));
    args.insert(
        "serviceEnvs".to_string(),
        serde_json::to_value(collect_service_envs()).unwrap_or_else(|_| Value::Object(Map::new())),
    );
    Value::Object(args)
}

/// Fetch a run, reconciling it against the engine once if it is still
/// active. Poll failures fall back to the stored record.
pub async fn get_run(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    id: &str,
) -> Result<WorkflowRun> {
    let run = store
        .get_run(id)?
        .ok_or_else(|| SkeinError::NotFound(format!("workflow run {}", id)))?;

    if run.status.is_active() {
        if let (Some(engine), Some(job_id)) = (engine, run.external_job_id.as_deref()) {
            match engine.get_job(job_id).await {
                Ok(job) => {
                    if let Some(updated) = reconcile_run(store, &run, &job)? {
                        return Ok(updated);
                    }
                }
                Err(e) => {
                    warn!(run = %run.id, error = %e, "Failed to poll job status");
                }
            }
        }
    }

    Ok(run)
}

/// Cancel an active run: best-effort engine cancel, then the local record
/// is marked cancelled regardless.
pub async fn cancel_run(
    store: &WorkflowStore,
    engine: Option<&Arc<dyn WorkflowEngine>>,
    id: &str,
) -> Result<WorkflowRun> {
    let run = store
        .get_run(id)?
        .ok_or_else(|| SkeinError::NotFound(format!("workflow run {}", id)))?;

    if !run.status.is_active() {
        return Err(SkeinError::InvalidTransition(format!(
            "Cannot cancel run with status: {}",
            run.status
        )));
    }

    if let (Some(engine), Some(job_id)) = (engine, run.external_job_id.as_deref()) {
        if let Err(e) = engine.cancel_job(job_id, "Cancelled by user").await {
            warn!(run = %run.id, job = %job_id, error = %e, "Failed to cancel engine job");
        }
    }

    store.complete_run(&run.id, RunStatus::Cancelled, None, None)?;
    let cancelled = store
        .get_run(&run.id)?
        .ok_or_else(|| SkeinError::NotFound(format!("workflow run {}", id)))?;
    info!(run = %cancelled.id, "Run cancelled");
    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubEngine;
    use chrono::Utc;
    use serde_json::json;
    use skein_core::dag::{Dag, DagNode};
    use skein_core::types::JobStatus;
    use uuid::Uuid;

    fn engine(stub: StubEngine) -> Arc<dyn WorkflowEngine> {
        Arc::new(stub)
    }

    fn deployed_workflow(store: &WorkflowStore, flow_path: Option<&str>) -> WorkflowRecord {
        let now = Utc::now();
        let record = WorkflowRecord {
            id: Uuid::new_v4().to_string(),
            app_id: "app-1".to_string(),
            name: "promo".to_string(),
            description: None,
            dag: Dag::new(vec![DagNode::new("send", "transactional-email")], vec![]),
            flow_path: flow_path.map(str::to_string),
            category: None,
            channel: None,
            audience_type: None,
            signature: None,
            signature_name: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        store.insert_workflow(&record).unwrap();
        record
    }

    #[tokio::test]
    async fn execute_starts_an_engine_job_and_queues_the_run() {
        let store = WorkflowStore::in_memory().unwrap();
        let workflow = deployed_workflow(&store, Some("f/workflows/app-1/promo"));
        let engine = engine(StubEngine::new());

        let run = execute(&store, Some(&engine), &workflow.id, json!({"leadId": "7"}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.external_job_id.as_deref(), Some("job-stub-1"));
        assert_eq!(run.inputs, json!({"leadId": "7"}));

        let stored = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.workflow_id, workflow.id);
    }

    #[tokio::test]
    async fn execute_by_name_reports_missing_workflows() {
        let store = WorkflowStore::in_memory().unwrap();
        let err = execute_by_name(&store, None, "app-1", "ghost", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SkeinError::NotFound(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn execute_without_an_engine_queues_with_no_job_id() {
        let store = WorkflowStore::in_memory().unwrap();
        let workflow = deployed_workflow(&store, None);

        let run = execute(&store, None, &workflow.id, json!({}))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.external_job_id.is_none());
    }

    #[tokio::test]
    async fn execute_requires_a_flow_path_when_an_engine_is_configured() {
        let store = WorkflowStore::in_memory().unwrap();
        let workflow = deployed_workflow(&store, None);
        let engine = engine(StubEngine::new());

        let err = execute(&store, Some(&engine), &workflow.id, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SkeinError::Engine(_)));
    }

    #[tokio::test]
    async fn engine_failure_on_start_propagates() {
        let store = WorkflowStore::in_memory().unwrap();
        let workflow = deployed_workflow(&store, Some("f/workflows/app-1/promo"));
        let engine = engine(StubEngine::failing());

        let err = execute(&store, Some(&engine), &workflow.id, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SkeinError::Engine(_)));
        assert!(store.list_runs(Some(&workflow.id), None).unwrap().is_empty());
    }

    #[test]
    fn engine_args_inject_app_context() {
        let args = engine_args(&json!({"leadId": "7"}), "app-1");
        assert_eq!(args["leadId"], "7");
        assert_eq!(args["appId"], "app-1");
        assert!(args["serviceEnvs"].is_object());
    }

    #[tokio::test]
    async fn get_run_reconciles_an_active_run_once() {
        let store = WorkflowStore::in_memory().unwrap();
        let run = WorkflowRun::queued("wf-1", Some("job-1".to_string()), json!({}));
        store.insert_run(&run).unwrap();

        let engine = engine(StubEngine::with_job(JobStatus {
            id: "job-1".into(),
            running: false,
            success: Some(true),
            result: Some(json!({"ok": true})),
            canceled: None,
        }));

        let loaded = get_run(&store, Some(&engine), &run.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn get_run_returns_the_stored_record_when_polling_fails() {
        let store = WorkflowStore::in_memory().unwrap();
        let run = WorkflowRun::queued("wf-1", Some("job-1".to_string()), json!({}));
        store.insert_run(&run).unwrap();

        let engine = engine(StubEngine::failing());
        let loaded = get_run(&store, Some(&engine), &run.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn cancel_marks_the_run_cancelled_even_if_the_engine_fails() {
        let store = WorkflowStore::in_memory().unwrap();
        let run = WorkflowRun::queued("wf-1", Some("job-1".to_string()), json!({}));
        store.insert_run(&run).unwrap();

        let engine = engine(StubEngine::failing());
        let cancelled = cancel_run(&store, Some(&engine), &run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_rejects_terminal_runs() {
        let store = WorkflowStore::in_memory().unwrap();
        let run = WorkflowRun::queued("wf-1", None, json!({}));
        store.insert_run(&run).unwrap();
        store
            .complete_run(&run.id, RunStatus::Completed, None, None)
            .unwrap();

        let err = cancel_run(&store, None, &run.id).await.unwrap_err();
        assert!(matches!(err, SkeinError::InvalidTransition(_)));
        assert_eq!(
            err.to_string(),
            "Cannot cancel run with status: completed"
        );
    }

    #[tokio::test]
    async fn cancel_passes_the_reason_to_the_engine() {
        let store = WorkflowStore::in_memory().unwrap();
        let run = WorkflowRun::queued("wf-1", Some("job-1".to_string()), json!({}));
        store.insert_run(&run).unwrap();

        let stub = Arc::new(StubEngine::new());
        let as_engine: Arc<dyn WorkflowEngine> = stub.clone();
        cancel_run(&store, Some(&as_engine), &run.id).await.unwrap();

        assert_eq!(stub.calls(), vec!["cancel_job job-1 (Cancelled by user)"]);
    }
}
