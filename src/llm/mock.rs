//! Mock reasoning-service client for testing.
//!
//! Returns queued canned responses in order, and can be told to fail or to
//! stall before answering.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{LandosError, Result};
use crate::llm::types::{CompletionOptions, Message};
use crate::llm::LlmClient;

/// A scripted reply.
#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Failure(String),
}

/// Mock client that replays queued replies.
///
/// Each call to `complete` consumes the next queued reply. Once the queue is
/// empty, every call returns the fallback reply (an empty JSON object unless
/// overridden).
#[derive(Debug)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    /// Creates a mock with no queued replies.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: MockReply::Text("{}".to_string()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful reply.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.push(MockReply::Text(response.into()))
    }

    /// Queues a service failure.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(MockReply::Failure(message.into()))
    }

    /// Makes every call after the queue drains fail with `message`.
    pub fn always_failing(mut self, message: impl Into<String>) -> Self {
        self.fallback = MockReply::Failure(message.into());
        self
    }

    /// Sleeps for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Messages sent on each call, in order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(self, reply: MockReply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    fn next_reply(&self) -> MockReply {
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _options: &CompletionOptions) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply() {
            MockReply::Text(text) => Ok(text),
            MockReply::Failure(message) => Err(LandosError::llm(message)),
        }
    }
}
