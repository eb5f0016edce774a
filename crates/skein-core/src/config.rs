use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

/// Top-level Skein configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Connection details for the external workflow-execution engine. Leaving
/// `url`/`token` unset puts the service in degraded mode: workflows are still
/// compiled and stored, runs are recorded without engine jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub url: Option<String>,
    #[serde(default = "default_engine_token")]
    pub token: Option<String>,
    #[serde(default = "default_engine_workspace")]
    pub workspace: String,
}

impl EngineConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.token.is_some()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            token: default_engine_token(),
            workspace: default_engine_workspace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_llm_api_key")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: default_llm_api_key(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

/// Extra node types merged into the builtin registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub node_types: HashMap<String, String>,
}

/// API-registry collaborator used by the agentic generation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_url")]
    pub url: Option<String>,
    #[serde(default = "default_discovery_api_key")]
    pub api_key: Option<String>,
}

impl DiscoveryConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            url: default_discovery_url(),
            api_key: default_discovery_api_key(),
        }
    }
}

fn default_engine_url() -> Option<String> {
    std::env::var("SKEIN_ENGINE_URL").ok()
}
fn default_engine_token() -> Option<String> {
    std::env::var("SKEIN_ENGINE_TOKEN").ok()
}
fn default_engine_workspace() -> String {
    std::env::var("SKEIN_ENGINE_WORKSPACE").unwrap_or_else(|_| "prod".to_string())
}
fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model_id() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_llm_api_key() -> Option<String> {
    std::env::var("ANTHROPIC_API_KEY").ok()
}
fn default_store_path() -> String {
    std::env::var("SKEIN_STORE_PATH").unwrap_or_else(|_| "skein.db".to_string())
}
fn default_poll_interval() -> u64 {
    10
}
fn default_discovery_url() -> Option<String> {
    std::env::var("SKEIN_API_REGISTRY_URL").ok()
}
fn default_discovery_api_key() -> Option<String> {
    std::env::var("SKEIN_API_REGISTRY_API_KEY").ok()
}

impl AppConfig {
    /// Load configuration from a TOML file, expanding `${ENV_VAR}`
    /// references. With no explicit path, `skein.toml` is used when present;
    /// otherwise defaults (including env fallbacks) apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = Path::new("skein.toml");
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback.to_path_buf()
            }
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|_| SkeinError::Config(format!("config file not found: {}", path.display())))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| SkeinError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Gather downstream service URLs and API keys from the environment. These
/// are injected into every run as the `serviceEnvs` input so executables can
/// read them without relying on engine-side env forwarding.
pub fn collect_service_envs() -> HashMap<String, String> {
    let exclude = [
        "SKEIN_ENGINE_URL",
        "SKEIN_ENGINE_TOKEN",
        "SKEIN_DATABASE_URL",
    ];

    let mut envs = HashMap::new();
    for (key, value) in std::env::vars() {
        if value.is_empty() || exclude.contains(&key.as_str()) {
            continue;
        }
        if key.starts_with("RAILWAY_") {
            continue;
        }
        if key.ends_with("_SERVICE_URL") || key.ends_with("_SERVICE_API_KEY") {
            envs.insert(key, value);
            continue;
        }
        // Legacy names without the _SERVICE_ infix
        if (key.ends_with("_URL") || key.ends_with("_API_KEY"))
            && !key.starts_with("SKEIN_")
            && !key.contains("DATABASE")
        {
            envs.insert(key, value);
        }
    }

    envs
}
