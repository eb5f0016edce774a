use std::io::Write;

use skein_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
url = "https://engine.example.com"
token = "wm-secret"
workspace = "staging"

[llm]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"

[store]
path = "/tmp/skein-test.db"

[poller]
interval_secs = 5

[registry.node_types]
"custom-enrichment" = "f/nodes/custom_enrichment"

[discovery]
url = "https://registry.example.com"
api_key = "reg-key"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(Some(tmp.path())).expect("load config");

    assert!(config.engine.is_configured());
    assert_eq!(
        config.engine.url.as_deref(),
        Some("https://engine.example.com")
    );
    assert_eq!(config.engine.workspace, "staging");

    assert_eq!(config.llm.provider, "anthropic");
    assert_eq!(config.llm.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.llm.api_key, Some("sk-test-key".to_string()));

    assert_eq!(config.store.path, "/tmp/skein-test.db");
    assert_eq!(config.poller.interval_secs, 5);
    assert_eq!(
        config
            .registry
            .node_types
            .get("custom-enrichment")
            .map(String::as_str),
        Some("f/nodes/custom_enrichment")
    );
    assert!(config.discovery.is_configured());
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("SKEIN_TEST_LLM_KEY", "expanded-key-value");

    let toml_content = r#"
[llm]
api_key = "${SKEIN_TEST_LLM_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(Some(tmp.path())).expect("load config");
    assert_eq!(config.llm.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("SKEIN_TEST_LLM_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[llm]
model_id = "claude-sonnet-4-20250514"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(Some(tmp.path())).expect("load config");

    assert_eq!(config.engine.workspace, "prod");
    assert_eq!(config.llm.provider, "anthropic");
    assert_eq!(config.poller.interval_secs, 10);
    assert!(config.registry.node_types.is_empty());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let err = AppConfig::load(Some(std::path::Path::new("/nonexistent/skein.toml"))).unwrap_err();
    assert!(err.to_string().contains("config file not found"));
}
