//! Reasoning-service client factory.
//!
//! Centralizes provider-specific logic for creating clients.

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{LandosError, Result};
use crate::llm::{
    AnthropicClient, AnthropicConfig, LlmClient, LlmProvider, MockLlmClient, OpenAiClient,
    OpenAiConfig,
};

/// Default Anthropic model.
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default OpenAI model.
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Creates the client described by the configuration.
///
/// The API key is resolved in order:
/// 1. `api_key` in the configuration
/// 2. Environment variable (`ANTHROPIC_API_KEY` or `OPENAI_API_KEY`)
///
/// The mock provider needs no key and answers `{}` to everything.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let provider: LlmProvider = config.provider.parse().map_err(LandosError::config)?;

    match provider {
        LlmProvider::Anthropic => {
            let key = resolve_key(config, "ANTHROPIC_API_KEY")?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string());
            let client = AnthropicClient::new(
                AnthropicConfig::new(key, model).with_timeout(config.timeout_secs),
            )?;
            Ok(Arc::new(client))
        }
        LlmProvider::OpenAi => {
            let key = resolve_key(config, "OPENAI_API_KEY")?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            let client =
                OpenAiClient::new(OpenAiConfig::new(key, model).with_timeout(config.timeout_secs))?;
            Ok(Arc::new(client))
        }
        LlmProvider::Mock => Ok(Arc::new(MockLlmClient::new())),
    }
}

fn resolve_key(config: &LlmConfig, env_var: &str) -> Result<String> {
    config
        .api_key
        .clone()
        .or_else(|| std::env::var(env_var).ok())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            LandosError::config(format!(
                "No API key configured. Set llm.api_key or {}.",
                env_var
            ))
        })
}
