//! Hypothesis generation: one reasoning call producing hypotheses with SQL.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ExploreConfig;
use crate::error::{LandosError, Result};
use crate::explore::types::{GenerationPayload, Hypothesis, StageOutcome};
use crate::llm::prompt::build_generation_messages;
use crate::llm::{parse_json_response, CompletionOptions, Conversation, LlmClient};

/// Name of the stand-in hypothesis used when nothing usable was generated.
pub const PLACEHOLDER_NAME: &str = "No hypotheses generated";

/// Hypotheses from one generation call and how the response was used.
#[derive(Debug, Clone)]
pub struct Generation {
    pub hypotheses: Vec<Hypothesis>,
    pub outcome: StageOutcome,
}

/// Asks the reasoning service for hypotheses.
pub struct HypothesisGenerator {
    client: Arc<dyn LlmClient>,
    options: CompletionOptions,
}

impl HypothesisGenerator {
    pub fn new(client: Arc<dyn LlmClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &ExploreConfig) -> Self {
        Self::new(
            client,
            CompletionOptions::json(config.generation_max_tokens, config.temperature),
        )
    }

    /// Generates hypotheses for the conversation.
    ///
    /// A service failure is an error. A response that does not parse, or
    /// parses to no hypotheses, yields a single placeholder hypothesis with
    /// no queries.
    pub async fn generate(&self, conversation: &Conversation) -> Result<Generation> {
        let messages = build_generation_messages(conversation);
        let response = self
            .client
            .complete(&messages, &self.options)
            .await
            .map_err(|e| LandosError::generation(e.to_string()))?;

        let (outcome, payload) =
            StageOutcome::from_parse(parse_json_response::<GenerationPayload>(&response));

        let hypotheses: Vec<Hypothesis> = payload
            .map(|p| p.hypotheses)
            .unwrap_or_default()
            .into_iter()
            .map(drop_blank_queries)
            .collect();

        if hypotheses.is_empty() {
            let outcome = match outcome {
                StageOutcome::Degraded { .. } => outcome,
                _ => StageOutcome::degraded("response contained no hypotheses"),
            };
            warn!(?outcome, "Generation produced nothing usable, using placeholder");
            return Ok(Generation {
                hypotheses: vec![placeholder()],
                outcome,
            });
        }

        let query_count: usize = hypotheses.iter().map(|h| h.queries.len()).sum();
        info!(
            hypotheses = hypotheses.len(),
            queries = query_count,
            ?outcome,
            "Generated hypotheses"
        );

        Ok(Generation {
            hypotheses,
            outcome,
        })
    }
}

fn placeholder() -> Hypothesis {
    Hypothesis::new(
        PLACEHOLDER_NAME,
        "The analysis service did not return usable hypotheses for this question.",
    )
}

fn drop_blank_queries(mut hypothesis: Hypothesis) -> Hypothesis {
    let before = hypothesis.queries.len();
    hypothesis.queries.retain(|q| !q.sql.trim().is_empty());
    if hypothesis.queries.len() < before {
        debug!(
            hypothesis = %hypothesis.name,
            dropped = before - hypothesis.queries.len(),
            "Dropped queries without SQL"
        );
    }
    hypothesis
}
