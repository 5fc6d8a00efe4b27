//! Reasoning-service integration for LandOS.
//!
//! Provides the client trait, provider implementations, prompts and the
//! JSON parse ladder used by the explore pipeline.

pub mod anthropic;
pub mod factory;
pub mod mock;
pub mod openai;
pub mod parser;
pub mod prompt;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use factory::create_client;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use parser::{parse_json_response, ParseOutcome};
pub use types::{CompletionOptions, Conversation, Message, Role};

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LandosError, Result};

/// Maximum number of attempts for transient errors.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Trait for clients of the external reasoning service.
///
/// Implementations must be thread-safe (Send + Sync) to support async operations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages.
    ///
    /// Returns the complete response text. Nothing guarantees the text is
    /// valid JSON even when `options.json_only` is set.
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String>;
}

/// Reasoning-service provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Anthropic Messages API
    #[default]
    Anthropic,
    /// OpenAI Chat Completions API
    OpenAi,
    /// Mock client for testing (no API key required)
    Mock,
}

impl LlmProvider {
    /// Returns the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sends a request built by `build`, retrying transient failures with
/// exponential backoff, and returns the body of the first successful response.
///
/// `parse_error` turns a non-success status and body into an error and
/// reports whether that status is worth retrying.
pub(crate) async fn send_with_retry<B, E>(provider: &str, build: B, parse_error: E) -> Result<String>
where
    B: Fn() -> RequestBuilder,
    E: Fn(StatusCode, &str) -> (LandosError, bool),
{
    let mut last_error = None;
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        debug!(provider, attempt, "Reasoning service request");

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| LandosError::llm(format!("Failed to read response: {}", e)))?;

                if status.is_success() {
                    return Ok(body);
                }

                let (error, retryable) = parse_error(status, &body);
                last_error = Some(error);
                if !retryable {
                    break;
                }
                if attempt < MAX_RETRY_ATTEMPTS {
                    warn!(
                        provider,
                        attempt,
                        status = %status,
                        "Request failed, retrying in {:?}",
                        delay
                    );
                }
            }
            Err(e) => {
                let retryable = e.is_timeout() || e.is_connect();
                last_error = Some(if e.is_timeout() {
                    LandosError::llm(format!("{} request timed out", provider))
                } else if e.is_connect() {
                    LandosError::llm(format!("Failed to connect to {} API", provider))
                } else {
                    LandosError::llm(format!("Request failed: {}", e))
                });
                if !retryable {
                    break;
                }
                if attempt < MAX_RETRY_ATTEMPTS {
                    warn!(provider, attempt, error = %e, "Request error, retrying in {:?}", delay);
                }
            }
        }

        if attempt < MAX_RETRY_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Err(last_error.unwrap_or_else(|| LandosError::llm(format!("{} request failed", provider))))
}
