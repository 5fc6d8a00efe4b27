//! Evaluation: one reasoning call ranking rows across every executed query.

use serde_json::{json, Value as Json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ExploreConfig;
use crate::explore::types::{EvaluationResult, Hypothesis, StageOutcome};
use crate::llm::prompt::build_evaluation_messages;
use crate::llm::{parse_json_response, CompletionOptions, LlmClient};
use crate::query::normalize::GEOMETRY_COLUMN;
use crate::query::Row;

/// Serialized size budget for the sample rows of one query.
pub const SAMPLE_CHAR_BUDGET: usize = 3000;

/// A ranking and how the response was used.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: EvaluationResult,
    pub outcome: StageOutcome,
}

/// Asks the reasoning service to rank candidate rows.
pub struct Evaluator {
    client: Arc<dyn LlmClient>,
    options: CompletionOptions,
}

impl Evaluator {
    pub fn new(client: Arc<dyn LlmClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &ExploreConfig) -> Self {
        Self::new(
            client,
            CompletionOptions::json(config.evaluation_max_tokens, config.temperature),
        )
    }

    /// Ranks rows from the executed hypotheses.
    ///
    /// Never fails: a service error or an unparseable response yields an
    /// empty evaluation with an explanatory summary.
    pub async fn evaluate(&self, user_query: &str, hypotheses: &[Hypothesis]) -> Evaluation {
        let digest = build_digest(hypotheses);
        let messages = build_evaluation_messages(user_query, &digest);

        let response = match self.client.complete(&messages, &self.options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Evaluation call failed");
                return Evaluation {
                    result: EvaluationResult::unavailable(
                        "The results could not be ranked because the analysis service failed.",
                    ),
                    outcome: StageOutcome::degraded(e.to_string()),
                };
            }
        };

        let (outcome, parsed) =
            StageOutcome::from_parse(parse_json_response::<EvaluationResult>(&response));

        match parsed {
            Some(result) => {
                info!(
                    sites = result.ranked_sites.len(),
                    follow_ups = result.follow_ups.len(),
                    ?outcome,
                    "Evaluated results"
                );
                Evaluation { result, outcome }
            }
            None => {
                warn!(?outcome, "Evaluation response unusable");
                Evaluation {
                    result: EvaluationResult::unavailable(
                        "The results could not be ranked because the analysis response was unreadable.",
                    ),
                    outcome,
                }
            }
        }
    }
}

/// Serializes every hypothesis and query outcome for the ranking prompt.
///
/// Queries with rows contribute a sample: rows in order with geometry
/// removed, added while the serialized sample stays within
/// [`SAMPLE_CHAR_BUDGET`]. Row positions in the sample match `row_index`.
pub fn build_digest(hypotheses: &[Hypothesis]) -> String {
    let entries: Vec<Json> = hypotheses
        .iter()
        .enumerate()
        .map(|(hi, hypothesis)| {
            let queries: Vec<Json> = hypothesis
                .queries
                .iter()
                .enumerate()
                .map(|(qi, query)| {
                    let mut entry = json!({
                        "query_index": qi,
                        "description": query.description,
                        "row_count": query.result.as_ref().map(|r| r.row_count).unwrap_or_default(),
                    });
                    match query.result.as_ref().and_then(|r| r.error.as_ref()) {
                        Some(error) => entry["error"] = json!(error),
                        None => entry["sample_rows"] = Json::Array(sample_rows(query.rows())),
                    }
                    entry
                })
                .collect();

            json!({
                "hypothesis_index": hi,
                "name": hypothesis.name,
                "rationale": hypothesis.rationale,
                "queries": queries,
            })
        })
        .collect();

    Json::Array(entries).to_string()
}

fn sample_rows(rows: &[Row]) -> Vec<Json> {
    let mut sample = Vec::new();
    // Account for the enclosing brackets.
    let mut used = 2;

    for row in rows {
        let stripped: Row = row
            .iter()
            .filter(|(column, _)| !column.eq_ignore_ascii_case(GEOMETRY_COLUMN))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        let value = Json::Object(stripped);
        let len = value.to_string().len() + usize::from(!sample.is_empty());

        if used + len > SAMPLE_CHAR_BUDGET {
            break;
        }
        used += len;
        sample.push(value);
    }

    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::types::SqlQuery;
    use crate::llm::MockLlmClient;
    use crate::query::ExecutionResult;
    use pretty_assertions::assert_eq;

    fn row(address: &str) -> Row {
        json!({
            "address": address,
            "sale_price": 450000.0,
            "geometry": {"type": "Point", "coordinates": [-6.26, 53.35]}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn executed(rows: Vec<Row>) -> SqlQuery {
        let mut query = SqlQuery::new("sales", "SELECT 1");
        query.result = Some(ExecutionResult::from_rows(rows));
        query
    }

    fn hypotheses() -> Vec<Hypothesis> {
        let mut failed = SqlQuery::new("broken", "SELECT nope");
        failed.result = Some(ExecutionResult::failed("column \"nope\" does not exist"));
        vec![Hypothesis::new("Cheap sales", "Below-market prices")
            .with_query(executed(vec![row("1 Main St"), row("2 Main St")]))
            .with_query(failed)]
    }

    #[test]
    fn test_digest_strips_geometry_and_keeps_indices() {
        let digest: Json = serde_json::from_str(&build_digest(&hypotheses())).unwrap();
        let first = &digest[0]["queries"][0];

        assert_eq!(digest[0]["hypothesis_index"], json!(0));
        assert_eq!(first["row_count"], json!(2));
        assert_eq!(first["sample_rows"][1]["address"], json!("2 Main St"));
        assert!(first["sample_rows"][0].get("geometry").is_none());

        let second = &digest[0]["queries"][1];
        assert_eq!(second["query_index"], json!(1));
        assert!(second["error"].as_str().unwrap().contains("nope"));
        assert!(second.get("sample_rows").is_none());
    }

    #[test]
    fn test_sample_respects_budget() {
        let rows: Vec<Row> = (0..25).map(|i| row(&format!("{} {}", i, "x".repeat(200)))).collect();
        let sample = sample_rows(&rows);

        assert!(!sample.is_empty());
        assert!(sample.len() < 25);
        assert!(Json::Array(sample.clone()).to_string().len() <= SAMPLE_CHAR_BUDGET);
        assert_eq!(sample[0]["address"], rows[0]["address"]);
    }

    #[tokio::test]
    async fn test_evaluate_parses_ranking() {
        let client = Arc::new(MockLlmClient::new().with_response(
            r#"{"title": "Cheap homes", "summary": "Two good buys.",
                "ranked_sites": [{"hypothesis_index": 0, "query_index": 0, "row_index": 1,
                                  "score": 88, "reason": "Lowest price per sqm"}],
                "follow_ups": ["a", "b", "c"]}"#,
        ));
        let evaluator = Evaluator::from_config(client.clone(), &ExploreConfig::default());

        let evaluation = evaluator.evaluate("cheap homes", &hypotheses()).await;
        assert_eq!(evaluation.outcome, StageOutcome::Parsed);
        assert_eq!(evaluation.result.title, "Cheap homes");
        assert_eq!(evaluation.result.ranked_sites[0].reference(), (0, 0, 1));
        assert_eq!(evaluation.result.ranked_sites[0].score, 88.0);

        let prompt = &client.calls()[0][1].content;
        assert!(prompt.contains("cheap homes"));
        assert!(prompt.contains("2 Main St"));
    }

    #[tokio::test]
    async fn test_one_bad_pick_keeps_the_ranking() {
        let client = Arc::new(MockLlmClient::new().with_response(
            r#"{"title": "Cheap homes", "summary": "Mostly good.",
                "ranked_sites": [
                  {"hypothesis_index": 0, "query_index": 0, "row_index": 0, "score": 80},
                  {"hypothesis_index": 0, "query_index": 0, "row_index": "second", "score": 70},
                  {"hypothesis_index": 0, "query_index": 0, "row_index": 1.0, "score": 60}],
                "follow_ups": ["a"]}"#,
        ));
        let evaluator = Evaluator::from_config(client, &ExploreConfig::default());

        let evaluation = evaluator.evaluate("cheap homes", &hypotheses()).await;
        assert_eq!(evaluation.outcome, StageOutcome::Parsed);
        assert_eq!(evaluation.result.title, "Cheap homes");
        assert_eq!(evaluation.result.ranked_sites.len(), 2);
        assert_eq!(evaluation.result.ranked_sites[1].reference(), (0, 0, 1));
        assert_eq!(evaluation.result.follow_ups, vec!["a"]);
    }

    #[tokio::test]
    async fn test_service_failure_degrades() {
        let client = Arc::new(MockLlmClient::new().with_failure("connection reset"));
        let evaluator = Evaluator::from_config(client, &ExploreConfig::default());

        let evaluation = evaluator.evaluate("q", &hypotheses()).await;
        assert!(evaluation.outcome.is_degraded());
        assert!(evaluation.result.ranked_sites.is_empty());
        assert!(!evaluation.result.summary.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_response_degrades() {
        let client = Arc::new(MockLlmClient::new().with_response("Ranking: site 1 is best"));
        let evaluator = Evaluator::from_config(client, &ExploreConfig::default());

        let evaluation = evaluator.evaluate("q", &hypotheses()).await;
        assert!(evaluation.outcome.is_degraded());
        assert!(evaluation.result.ranked_sites.is_empty());
    }
}
