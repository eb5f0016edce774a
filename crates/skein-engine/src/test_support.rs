//! Trait doubles shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use skein_core::error::{Result, SkeinError};
use skein_core::traits::WorkflowEngine;
use skein_core::types::JobStatus;

/// Engine double: records every call and serves canned job statuses.
pub struct StubEngine {
    jobs: Mutex<HashMap<String, JobStatus>>,
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Every call errors, as if the engine were unreachable.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_job(job: JobStatus) -> Self {
        let engine = Self::new();
        engine.set_job(job);
        engine
    }

    pub fn set_job(&self, job: JobStatus) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            Err(SkeinError::Engine("engine unreachable".into()))
        } else {
            Ok(())
        }
    }
}

impl WorkflowEngine for StubEngine {
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
        Box::pin(async move {
            self.check()?;
            Ok(path)
        })
    }

    fn update_flow(&self, path: &str, _flow: Value) -> BoxFuture<'_, Result<()>> {
        self.record(format!("update_flow {}", path));
        Box::pin(async move { self.check() })
    }

    fn delete_flow(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        self.record(format!("delete_flow {}", path));
        Box::pin(async move { self.check() })
    }

    fn run_flow(&self, path: &str, _args: Value) -> BoxFuture<'_, Result<String>> {
        self.record(format!("run_flow {}", path));
        Box::pin(async move {
            self.check()?;
            Ok("job-stub-1".to_string())
        })
    }

    fn get_job(&self, job_id: &str) -> BoxFuture<'_, Result<JobStatus>> {
        let job_id = job_id.to_string();
        self.record(format!("get_job {}", job_id));
        Box::pin(async move {
            self.check()?;
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
        Box::pin(async move { self.check() })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(!self.fail) })
    }
}
