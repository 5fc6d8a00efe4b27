//! Anthropic client implementation.
//!
//! Implements the LlmClient trait for Anthropic's Messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LandosError, Result};
use crate::llm::types::{CompletionOptions, Message, Role};
use crate::llm::{send_with_retry, LlmClient};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 90;

/// Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Instruction appended to the system prompt when JSON-only output is requested.
const JSON_ONLY_INSTRUCTION: &str =
    "Respond with a single JSON object only. No prose, no markdown fences.";

/// Anthropic client configuration.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Model to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    /// Creates a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Anthropic reasoning-service client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicClient {
    /// Creates a new Anthropic client with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LandosError::llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Extracts system messages and converts remaining messages to Anthropic format.
    ///
    /// Anthropic takes the system prompt as a top-level field, so every system
    /// message is joined into it.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system: Vec<&str> = Vec::new();
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system.push(&msg.content),
                Role::User | Role::Assistant => converted.push(AnthropicMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, converted)
    }

    fn build_request(&self, messages: &[Message], options: &CompletionOptions) -> AnthropicRequest {
        let (mut system, messages) = Self::convert_messages(messages);

        if options.json_only {
            system = Some(match system {
                Some(s) => format!("{}\n\n{}", s, JSON_ONLY_INSTRUCTION),
                None => JSON_ONLY_INSTRUCTION.to_string(),
            });
        }

        AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system,
            messages,
        }
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (LandosError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return (
                LandosError::llm("Authentication failed. Check your ANTHROPIC_API_KEY."),
                false,
            );
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (LandosError::llm("Rate limited by Anthropic API."), true);
        }

        // Anthropic reports overload as 529.
        let is_retryable = status.is_server_error();

        if let Ok(error_response) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            return (
                LandosError::llm(format!(
                    "Anthropic API error: {}",
                    error_response.error.message
                )),
                is_retryable,
            );
        }

        (
            LandosError::llm(format!("Anthropic API error ({}): {}", status, body)),
            is_retryable,
        )
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String> {
        let request = self.build_request(messages, options);

        let body = send_with_retry(
            "Anthropic",
            || {
                self.client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("Content-Type", "application/json")
                    .json(&request)
            },
            Self::parse_error,
        )
        .await?;

        let response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| LandosError::llm(format!("Failed to parse response: {}", e)))?;

        let text = response
            .content
            .into_iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(LandosError::llm("No response from Anthropic"));
        }

        Ok(text)
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}
