use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use skein_core::config::DiscoveryConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::ServiceDiscovery;
use skein_core::types::{EndpointSummary, ServiceSummary};

/// HTTP client for the platform's API registry.
///
/// `GET /llm-context` answers with a compact summary of every service;
/// `GET /openapi/<service>` answers with one service's full OpenAPI spec.
#[derive(Debug)]
pub struct ApiRegistryClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ApiRegistryClient {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| SkeinError::Config("api-registry URL not set".into()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SkeinError::Config("api-registry API key not set".into()))?;

        Ok(Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| SkeinError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SkeinError::Discovery(api_error(path, status.as_u16(), &text)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SkeinError::Discovery(e.to_string()))
    }
}

fn api_error(path: &str, status: u16, body: &str) -> String {
    format!("api-registry error: GET {} -> {}: {}", path, status, body)
}

/// Wire shape of the `/llm-context` payload. Endpoint parameters arrive as
/// objects and are flattened to display strings for the summary.
#[derive(Deserialize)]
struct LlmContext {
    #[serde(default)]
    services: Vec<WireService>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireService {
    service: String,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    endpoints: Vec<WireEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEndpoint {
    method: String,
    path: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    params: Vec<WireParam>,
    #[serde(default)]
    body_fields: Vec<String>,
}

#[derive(Deserialize)]
struct WireParam {
    name: String,
    #[serde(rename = "in")]
    location: String,
    #[serde(default)]
    required: bool,
}

impl WireService {
    fn into_summary(self) -> ServiceSummary {
        ServiceSummary {
            service: self.service,
            base_url: self.base_url,
            title: self.title,
            description: self.description,
            endpoints: self
                .endpoints
                .into_iter()
                .map(WireEndpoint::into_summary)
                .collect(),
        }
    }
}

impl WireEndpoint {
    fn into_summary(self) -> EndpointSummary {
        EndpointSummary {
            method: self.method,
            path: self.path,
            summary: self.summary,
            params: self.params.iter().map(WireParam::display).collect(),
            body_fields: self.body_fields,
        }
    }
}

impl WireParam {
    fn display(&self) -> String {
        if self.required {
            format!("{} ({}, required)", self.name, self.location)
        } else {
            format!("{} ({})", self.name, self.location)
        }
    }
}

impl ServiceDiscovery for ApiRegistryClient {
    fn list_services(&self) -> BoxFuture<'_, Result<Vec<ServiceSummary>>> {
        Box::pin(async move {
            let context: LlmContext = self.get_json("/llm-context").await?;
            debug!(services = context.services.len(), "Fetched registry context");
            Ok(context
                .services
                .into_iter()
                .map(WireService::into_summary)
                .collect())
        })
    }

    fn get_service(&self, service: &str) -> BoxFuture<'_, Result<Value>> {
        let path = format!("/openapi/{}", service);
        Box::pin(async move {
            let spec: Value = self.get_json(&path).await?;
            debug!(path = %path, "Fetched service spec");
            Ok(spec)
        })
    }
}
