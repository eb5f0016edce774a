use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skein_core::config::PollerConfig;
use skein_core::error::Result;
use skein_core::traits::WorkflowEngine;
use skein_core::types::{JobStatus, RunStatus, WorkflowRun};

use crate::store::WorkflowStore;

/// Background reconciliation of active runs against engine jobs.
///
/// The engine never calls back; this poller is the only thing that moves
/// runs forward once they are queued (aside from a one-shot reconcile on
/// run reads).
pub struct JobPoller {
    store: Arc<WorkflowStore>,
    engine: Arc<dyn WorkflowEngine>,
    interval: Duration,
    cancel: CancellationToken,
    in_flight: AtomicBool,
}

impl JobPoller {
    pub fn new(
        store: Arc<WorkflowStore>,
        engine: Arc<dyn WorkflowEngine>,
        config: &PollerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            engine,
            interval: Duration::from_secs(config.interval_secs),
            cancel,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run the polling loop. Blocks until cancelled.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Job poller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => {
                    info!("Job poller shutting down");
                    break;
                }
            }

            self.tick().await;
        }
    }

    /// One reconciliation pass. A pass still in flight makes this a no-op.
    pub async fn tick(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Poll already in progress, skipping tick");
            return;
        }

        if let Err(e) = self.poll_active_runs().await {
            warn!(error = %e, "Poll pass failed");
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn poll_active_runs(&self) -> Result<()> {
        let runs = self.store.list_active_runs()?;
        if runs.is_empty() {
            return Ok(());
        }
        debug!(count = runs.len(), "Reconciling active runs");

        for run in &runs {
            let Some(job_id) = run.external_job_id.as_deref() else {
                continue;
            };

            match self.engine.get_job(job_id).await {
                Ok(job) => {
                    if let Err(e) = reconcile_run(&self.store, run, &job) {
                        warn!(run = %run.id, error = %e, "Failed to apply job status");
                    }
                }
                Err(e) => {
                    warn!(run = %run.id, job = %job_id, error = %e, "Failed to poll job");
                }
            }
        }

        Ok(())
    }
}

/// Apply an engine job report to a stored run. Returns the re-read run when
/// a transition fired, `None` when nothing changed.
pub(crate) fn reconcile_run(
    store: &WorkflowStore,
    run: &WorkflowRun,
    job: &JobStatus,
) -> Result<Option<WorkflowRun>> {
    if !job.running {
        let success = job.success.unwrap_or(false);
        let status = if success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let result = if success { job.result.as_ref() } else { None };
        let error = if success {
            None
        } else {
            Some(job_error_text(job.result.as_ref()))
        };

        store.complete_run(&run.id, status, result, error.as_deref())?;
        info!(run = %run.id, status = %status, "Run finished");
        return store.get_run(&run.id);
    }

    if run.status == RunStatus::Queued {
        store.mark_run_running(&run.id)?;
        debug!(run = %run.id, "Run started");
        return store.get_run(&run.id);
    }

    Ok(None)
}

/// Failed jobs report whatever the engine left in `result`; flatten it to
/// text for the run record.
fn job_error_text(result: Option<&Value>) -> String {
    match result {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubEngine;
    use serde_json::json;

    fn queued_run(store: &WorkflowStore, job_id: Option<&str>) -> WorkflowRun {
        let run = WorkflowRun::queued("wf-1", job_id.map(str::to_string), json!({}));
        store.insert_run(&run).unwrap();
        run
    }

    fn poller(store: Arc<WorkflowStore>, engine: Arc<StubEngine>) -> JobPoller {
        JobPoller::new(
            store,
            engine,
            &PollerConfig { interval_secs: 1 },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn finished_job_completes_the_run() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, Some("job-1"));
        let engine = Arc::new(StubEngine::with_job(JobStatus {
            id: "job-1".into(),
            running: false,
            success: Some(true),
            result: Some(json!({"sent": 12})),
            canceled: None,
        }));

        poller(store.clone(), engine).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.result, Some(json!({"sent": 12})));
        assert!(loaded.error.is_none());
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_job_records_the_error_text() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, Some("job-1"));
        let engine = Arc::new(StubEngine::with_job(JobStatus {
            id: "job-1".into(),
            running: false,
            success: Some(false),
            result: Some(json!("script exited with code 1")),
            canceled: None,
        }));

        poller(store.clone(), engine).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert!(loaded.result.is_none());
        assert_eq!(loaded.error.as_deref(), Some("script exited with code 1"));
    }

    #[tokio::test]
    async fn failure_without_a_result_yields_unknown_error() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, Some("job-1"));
        let engine = Arc::new(StubEngine::with_job(JobStatus {
            id: "job-1".into(),
            running: false,
            success: None,
            result: None,
            canceled: None,
        }));

        poller(store.clone(), engine).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("Unknown error"));
    }

    #[tokio::test]
    async fn running_job_starts_a_queued_run() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, Some("job-1"));
        let engine = Arc::new(StubEngine::with_job(JobStatus {
            id: "job-1".into(),
            running: true,
            success: None,
            result: None,
            canceled: None,
        }));

        poller(store.clone(), engine).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn running_run_is_left_alone_while_the_job_runs() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, Some("job-1"));
        store.mark_run_running(&run.id).unwrap();
        let started = store.get_run(&run.id).unwrap().unwrap().started_at;

        let engine = Arc::new(StubEngine::with_job(JobStatus {
            id: "job-1".into(),
            running: true,
            success: None,
            result: None,
            canceled: None,
        }));

        poller(store.clone(), engine).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.started_at, started);
    }

    #[tokio::test]
    async fn runs_without_a_job_id_are_skipped() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, None);
        let engine = Arc::new(StubEngine::new());

        poller(store.clone(), engine.clone()).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn engine_failures_leave_the_run_untouched() {
        let store = Arc::new(WorkflowStore::in_memory().unwrap());
        let run = queued_run(&store, Some("job-1"));
        let engine = Arc::new(StubEngine::failing());

        poller(store.clone(), engine).tick().await;

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
    }

    #[test]
    fn error_text_flattens_structured_results() {
        assert_eq!(job_error_text(Some(&json!("boom"))), "boom");
        assert_eq!(job_error_text(Some(&Value::Null)), "Unknown error");
        assert_eq!(job_error_text(None), "Unknown error");
        assert_eq!(
            job_error_text(Some(&json!({"error": {"message": "timeout"}}))),
            r#"{"error":{"message":"timeout"}}"#
        );
    }
}
