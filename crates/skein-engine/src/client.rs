use futures::future::BoxFuture;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use skein_core::config::EngineConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::WorkflowEngine;
use skein_core::types::JobStatus;

/// HTTP client for the external workflow-execution engine.
///
/// All flow and job routes are workspace-scoped under
/// `<url>/api/w/<workspace>`; only the version probe lives outside it.
#[derive(Debug)]
pub struct EngineClient {
    http: Client,
    base_url: String,
    token: String,
    workspace: String,
}

impl EngineClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| SkeinError::Config("engine URL not set".into()))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| SkeinError::Config("engine token not set".into()))?;

        Ok(Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            workspace: config.workspace.clone(),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/w/{}{}", self.base_url, self.workspace, path);

        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| SkeinError::Engine(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SkeinError::Engine(api_error(&method, path, status.as_u16(), &text)));
        }

        Ok(response)
    }
}

fn api_error(method: &Method, path: &str, status: u16, body: &str) -> String {
    format!("engine API error: {} {} -> {}: {}", method, path, status, body)
}

/// Job-run routes answer with the bare job id, sometimes JSON-quoted.
fn parse_job_id(body: &str) -> String {
    body.trim().trim_matches('"').to_string()
}

#[derive(Serialize)]
struct CreateFlowBody<'a> {
    path: &'a str,
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<Value>,
}

impl WorkflowEngine for EngineClient {
    fn create_flow(
        &self,
        path: &str,
        summary: &str,
        description: Option<&str>,
        value: Value,
        schema: Option<Value>,
    ) -> BoxFuture<'_, Result<String>> {
        let path = path.to_string();
        let summary = summary.to_string();
        let description = description.map(str::to_string);

        Box::pin(async move {
            let body = serde_json::to_value(CreateFlowBody {
                path: &path,
                summary: &summary,
                description: description.as_deref(),
                value,
                schema,
            })?;

            self.request(Method::POST, "/flows/create", Some(&body))
                .await?;
            debug!(path = %path, "Flow created on engine");
            Ok(path)
        })
    }

    fn update_flow(&self, path: &str, flow: Value) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        let mut flow = flow;

        Box::pin(async move {
            // The update route expects the path repeated inside the body.
            if let Value::Object(map) = &mut flow {
                map.insert("path".to_string(), Value::String(path.clone()));
            }

            self.request(Method::POST, &format!("/flows/update/{}", path), Some(&flow))
                .await?;
            debug!(path = %path, "Flow updated on engine");
            Ok(())
        })
    }

    fn delete_flow(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();

        Box::pin(async move {
            self.request(Method::DELETE, &format!("/flows/delete/{}", path), None)
                .await?;
            Ok(())
        })
    }

    fn run_flow(&self, path: &str, args: Value) -> BoxFuture<'_, Result<String>> {
        let path = path.to_string();

        Box::pin(async move {
            let response = self
                .request(Method::POST, &format!("/jobs/run/f/{}", path), Some(&args))
                .await?;
            let body = response
                .text()
                .await
                .map_err(|e| SkeinError::Engine(e.to_string()))?;
            let job_id = parse_job_id(&body);
            debug!(path = %path, job = %job_id, "Flow run started");
            Ok(job_id)
        })
    }

    fn get_job(&self, job_id: &str) -> BoxFuture<'_, Result<JobStatus>> {
        let job_id = job_id.to_string();

        Box::pin(async move {
            let response = self
                .request(Method::GET, &format!("/jobs_u/get/{}", job_id), None)
                .await?;
            response
                .json::<JobStatus>()
                .await
                .map_err(|e| SkeinError::Engine(e.to_string()))
        })
    }

    fn cancel_job(&self, job_id: &str, reason: &str) -> BoxFuture<'_, Result<()>> {
        let job_id = job_id.to_string();
        let body = serde_json::json!({ "reason": reason });

        Box::pin(async move {
            self.request(
                Method::POST,
                &format!("/jobs/queue/cancel/{}", job_id),
                Some(&body),
            )
            .await?;
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let response = self
                .http
                .get(format!("{}/api/version", self.base_url))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| SkeinError::Engine(e.to_string()))?;
            Ok(response.status().is_success())
        })
    }
}
