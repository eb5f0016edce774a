pub mod providers;

use skein_core::config::LlmConfig;
use skein_core::error::{Result, SkeinError};
use skein_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;

/// Create an LLM client based on the configured provider name.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Ok(Box::new(AnthropicClient::new(config)?)),
        other => Err(SkeinError::UnsupportedProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model_id: "claude-sonnet-4-20250514".to_string(),
            api_key: api_key.map(str::to_string),
            base_url: None,
        }
    }

    #[test]
    fn anthropic_provider_yields_a_client() {
        let client = create_client(&config("anthropic", Some("sk-test"))).unwrap();
        assert_eq!(client.model(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = create_client(&config("openai", Some("sk-test"))).unwrap_err();
        assert!(matches!(err, SkeinError::UnsupportedProvider(ref p) if p == "openai"));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = create_client(&config("anthropic", None)).unwrap_err();
        assert!(matches!(err, SkeinError::Config(_)));
    }
}
