//! End-to-end explore pipeline tests against the in-memory store.

use landos::config::ExploreConfig;
use landos::db::{ConnectionPool, MockOutcome, MockPool, Value};
use landos::error::LandosError;
use landos::explore::{ExplorePipeline, SourceTable, StageOutcome};
use landos::llm::{Conversation, LlmClient, Message, MockLlmClient};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GENERATION: &str = r#"Here is my plan:
{"hypotheses": [
  {"name": "Below-market sales",
   "rationale": "Recent sales under 400k near the Luas",
   "queries": [
     {"description": "Cheap sales", "sql": "SELECT address, sale_price, ST_AsGeoJSON(geom) AS geometry FROM sold_properties WHERE sale_price < 400000 LIMIT 25"},
     {"description": "Cleanup", "sql": "DROP TABLE sold_properties"}
   ]},
  {"name": "Zoned but idle",
   "rationale": "RZLT land still undeveloped",
   "queries": [
     {"description": "RZLT parcels", "sql": "SELECT zone_desc, site_area, ST_AsGeoJSON(geom) AS geometry FROM rzlt LIMIT 25"}
   ]}
]}"#;

const EVALUATION: &str = r#"{"title": "Value pockets in Dublin South",
  "summary": "Two standouts.",
  "ranked_sites": [
    {"hypothesis_index": 1, "query_index": 0, "row_index": 0, "score": 92, "reason": "Large zoned site"},
    {"hypothesis_index": 0, "query_index": 0, "row_index": 1, "score": 81, "reason": "Cheapest sale"},
    {"hypothesis_index": 4, "query_index": 0, "row_index": 0, "score": 99, "reason": "Invented"}
  ],
  "follow_ups": ["Filter by BER", "Check flood zones", "Compare asking prices", "Extra"]}"#;

fn sale(address: &str, price: f64, lon: f64) -> Vec<Value> {
    vec![
        Value::from(address),
        Value::Float(price),
        Value::String(format!(
            r#"{{"type": "Point", "coordinates": [{lon}, 53.29]}}"#
        )),
    ]
}

fn store() -> MockPool {
    MockPool::with_capacity(2)
        .on_contains(
            "FROM sold_properties",
            MockOutcome::rows(
                &["address", "sale_price", "geometry"],
                vec![
                    sale("1 Main St", 380000.0, -6.21),
                    sale("2 Main St", 355000.0, -6.22),
                ],
            ),
        )
        .on_contains(
            "FROM rzlt",
            MockOutcome::rows(
                &["zone_desc", "site_area", "geometry"],
                vec![vec![
                    Value::from("Residential"),
                    Value::Float(1.4),
                    Value::from(
                        r#"{"type": "Polygon", "coordinates": [[[-6.2, 53.2], [-6.0, 53.2], [-6.0, 53.4], [-6.2, 53.4]]]}"#,
                    ),
                ]],
            ),
        )
}

fn pipeline(pool: Arc<MockPool>, llm: Arc<MockLlmClient>, config: &ExploreConfig) -> ExplorePipeline {
    let pool: Arc<dyn ConnectionPool> = pool;
    let llm: Arc<dyn LlmClient> = llm;
    ExplorePipeline::new(pool, llm, config)
}

#[tokio::test]
async fn test_explore_end_to_end() {
    let pool = Arc::new(store());
    let llm = Arc::new(
        MockLlmClient::new()
            .with_response(GENERATION)
            .with_response(EVALUATION),
    );
    let pipeline = pipeline(pool.clone(), llm.clone(), &ExploreConfig::default());

    let response = pipeline
        .run(&Conversation::from_question("Where is undervalued land near Sandyford?"))
        .await
        .unwrap();

    assert_eq!(response.title, "Value pockets in Dublin South");
    assert_eq!(response.generation, StageOutcome::Extracted);
    assert_eq!(response.evaluation, StageOutcome::Parsed);

    assert_eq!(response.stats.queries_attempted, 3);
    assert_eq!(response.stats.queries_succeeded, 2);
    assert_eq!(response.stats.queries_rejected, 1);
    assert_eq!(response.stats.rows_returned, 3);

    assert_eq!(response.rows.len(), 2);
    let zoned = &response.rows[0];
    assert_eq!(zoned.rank, 0);
    assert_eq!(zoned.source_table, SourceTable::Rzlt);
    assert!((zoned.longitude - (-6.1)).abs() < 1e-9);
    assert!((zoned.latitude - 53.3).abs() < 1e-9);

    let sale = &response.rows[1];
    assert_eq!(sale.source_table, SourceTable::SoldProperties);
    assert_eq!(sale.properties["address"], serde_json::json!("2 Main St"));
    assert_eq!(sale.longitude, -6.22);

    assert_eq!(response.follow_ups.len(), 3);

    let rejected = &response.hypotheses[0].queries[1];
    assert_eq!(rejected.row_count, 0);
    assert_eq!(
        rejected.error.as_deref(),
        Some("Rejected: blocked keyword: DROP")
    );

    // The rejected statement never reached the store.
    assert!(pool.statements().iter().all(|s| !s.contains("DROP")));
    assert_eq!(pool.acquired(), 2);
    assert_eq!(pool.released(), 2);
    assert_eq!(pool.available(), 2);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_conversation_context_reaches_generation() {
    let pool = Arc::new(store());
    let llm = Arc::new(MockLlmClient::new().with_response(GENERATION));
    let pipeline = pipeline(pool, llm.clone(), &ExploreConfig::default());

    let conversation = Conversation::from(vec![
        Message::user("Show me cheap sales"),
        Message::assistant("Here are five sales under 400k."),
        Message::user("Only near zoned land"),
    ]);
    pipeline.run(&conversation).await.unwrap();

    let generation_call = &llm.calls()[0];
    assert_eq!(generation_call.len(), 4);
    assert_eq!(generation_call[3].content, "Only near zoned land");

    let evaluation_call = &llm.calls()[1];
    assert!(evaluation_call[1].content.contains("Only near zoned land"));
}

#[tokio::test]
async fn test_unusable_ranking_falls_back_to_first_rows() {
    let pool = Arc::new(store());
    let llm = Arc::new(
        MockLlmClient::new()
            .with_response(GENERATION)
            .with_response("I could not decide."),
    );
    let pipeline = pipeline(pool, llm, &ExploreConfig::default());

    let response = pipeline
        .run(&Conversation::from_question("undervalued land"))
        .await
        .unwrap();

    assert!(response.evaluation.is_degraded());
    assert_eq!(response.rows.len(), 3);
    assert!(response.rows.iter().all(|r| r.score == 50.0));
    assert_eq!(response.rows[0].reason, "Matched hypothesis: Below-market sales");
    assert_eq!(response.rows[2].reason, "Matched hypothesis: Zoned but idle");
}

#[tokio::test]
async fn test_store_outage_yields_empty_results() {
    let pool = Arc::new(MockPool::new().failing_acquire("connection refused"));
    let llm = Arc::new(
        MockLlmClient::new()
            .with_response(GENERATION)
            .with_response(EVALUATION),
    );
    let pipeline = pipeline(pool, llm, &ExploreConfig::default());

    let response = pipeline
        .run(&Conversation::from_question("undervalued land"))
        .await
        .unwrap();

    assert_eq!(response.stats.queries_succeeded, 0);
    assert!(response.rows.is_empty());
    assert!(response.hypotheses[0].queries[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("connection refused")));
}

#[tokio::test]
async fn test_generation_service_failure_is_an_error() {
    let pool = Arc::new(store());
    let llm = Arc::new(MockLlmClient::new().always_failing("401 unauthorized"));
    let pipeline = pipeline(pool.clone(), llm, &ExploreConfig::default());

    let err = pipeline
        .run(&Conversation::from_question("anything"))
        .await
        .unwrap_err();

    assert!(matches!(err, LandosError::Generation(_)));
    assert_eq!(pool.acquired(), 0);
}

#[tokio::test]
async fn test_slow_evaluation_times_out() {
    let pool = Arc::new(store());
    let llm = Arc::new(
        MockLlmClient::new()
            .with_response(GENERATION)
            .with_response(EVALUATION)
            .with_delay(Duration::from_millis(1500)),
    );
    let config = ExploreConfig {
        generation_timeout_secs: 5,
        evaluation_timeout_secs: 1,
        ..ExploreConfig::default()
    };
    let pipeline = pipeline(pool.clone(), llm, &config);

    let err = pipeline
        .run(&Conversation::from_question("anything"))
        .await
        .unwrap_err();

    assert!(matches!(err, LandosError::Timeout(_)));
    assert_eq!(pool.released(), pool.acquired());
}

#[tokio::test]
async fn test_concurrent_execution_keeps_attachment_order() {
    let pool = Arc::new(store());
    let llm = Arc::new(
        MockLlmClient::new()
            .with_response(GENERATION)
            .with_response(EVALUATION),
    );
    let config = ExploreConfig {
        max_concurrent_queries: 3,
        ..ExploreConfig::default()
    };
    let pipeline = pipeline(pool.clone(), llm, &config);

    let response = pipeline
        .run(&Conversation::from_question("anything"))
        .await
        .unwrap();

    assert_eq!(response.hypotheses[0].queries[0].row_count, 2);
    assert_eq!(response.hypotheses[1].queries[0].row_count, 1);
    assert_eq!(response.rows[0].source_table, SourceTable::Rzlt);
    assert_eq!(pool.available(), 2);
}

#[tokio::test]
async fn test_cancelled_request() {
    let pool = Arc::new(store());
    let llm = Arc::new(MockLlmClient::new().with_response(GENERATION));
    let pipeline = pipeline(pool, llm, &ExploreConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline
        .run_with_cancel(&Conversation::from_question("anything"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LandosError::Cancelled));
}
