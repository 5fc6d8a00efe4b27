//! Request-scoped data model of the explore pipeline.
//!
//! The hypothesis tree owns everything: hypotheses own their queries, queries
//! own their results. Ranked sites and assembled rows refer back into the
//! tree by index only.

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::llm::ParseOutcome;
use crate::query::{ExecutionResult, Row};

/// One generated SQL statement and, once run, its result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    /// Untrusted, model-authored SQL.
    #[serde(default, deserialize_with = "lenient_text")]
    pub sql: String,
    #[serde(default, skip_deserializing)]
    pub result: Option<ExecutionResult>,
}

impl SqlQuery {
    pub fn new(description: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sql: sql.into(),
            result: None,
        }
    }

    /// Rows of the attached result, or none if not executed.
    pub fn rows(&self) -> &[Row] {
        self.result.as_ref().map(|r| r.rows.as_slice()).unwrap_or_default()
    }
}

/// A named candidate explanation with the queries that test it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub rationale: String,
    #[serde(default, alias = "sql_queries", deserialize_with = "skip_invalid")]
    pub queries: Vec<SqlQuery>,
}

impl Hypothesis {
    pub fn new(name: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rationale: rationale.into(),
            queries: Vec::new(),
        }
    }

    pub fn with_query(mut self, query: SqlQuery) -> Self {
        self.queries.push(query);
        self
    }
}

/// Reasoning-service payload for hypothesis generation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationPayload {
    #[serde(default, deserialize_with = "skip_invalid")]
    pub hypotheses: Vec<Hypothesis>,
}

/// A ranking pick: an index triple into the hypothesis tree plus score and reason.
///
/// Indices come from the model and may point anywhere, including below zero.
/// Integral floats and numeric strings are read as indices; anything else
/// makes the pick invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSite {
    #[serde(deserialize_with = "lenient_index")]
    pub hypothesis_index: i64,
    #[serde(deserialize_with = "lenient_index")]
    pub query_index: i64,
    #[serde(deserialize_with = "lenient_index")]
    pub row_index: i64,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: f64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: String,
}

impl RankedSite {
    pub fn new(hypothesis_index: i64, query_index: i64, row_index: i64, score: f64) -> Self {
        Self {
            hypothesis_index,
            query_index,
            row_index,
            score,
            reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// The (hypothesis, query, row) triple.
    pub fn reference(&self) -> (i64, i64, i64) {
        (self.hypothesis_index, self.query_index, self.row_index)
    }
}

/// Ranking produced by the evaluation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub summary: String,
    /// Malformed picks are dropped one by one; the rest survive.
    #[serde(default, alias = "sites", deserialize_with = "skip_invalid")]
    pub ranked_sites: Vec<RankedSite>,
    /// Three are asked for; not enforced on input.
    #[serde(default, alias = "follow_up_suggestions", deserialize_with = "skip_invalid")]
    pub follow_ups: Vec<String>,
}

impl EvaluationResult {
    /// An evaluation with no picks and an explanatory summary only.
    pub fn unavailable(summary: impl Into<String>) -> Self {
        Self {
            title: "Exploration results".to_string(),
            summary: summary.into(),
            ranked_sites: Vec::new(),
            follow_ups: Vec::new(),
        }
    }
}

/// Source table a row most likely came from, inferred from its columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    SoldProperties,
    Rzlt,
    DlrPlanning,
    Cadastral,
    Unknown,
}

impl SourceTable {
    /// Classifies a row by its column signature.
    ///
    /// Checked in order: sale record, zoning record, planning record, parcel.
    /// Rows mixing columns from several tables take the first match.
    pub fn classify(row: &Row) -> Self {
        let has = |column: &str| row.contains_key(column);

        if has("address") && has("sale_price") {
            Self::SoldProperties
        } else if has("zone_desc") || has("site_area") {
            Self::Rzlt
        } else if has("plan_ref") || has("decision") {
            Self::DlrPlanning
        } else if has("nationalcadastralreference") || (has("area_sqm") && !has("address")) {
            Self::Cadastral
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoldProperties => "sold_properties",
            Self::Rzlt => "rzlt",
            Self::DlrPlanning => "dlr_planning",
            Self::Cadastral => "cadastral",
            Self::Unknown => "unknown",
        }
    }
}

/// A selected row with its derived map position and ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledRow {
    /// 0-based position in the final list.
    pub rank: usize,
    pub score: f64,
    pub reason: String,
    pub source_table: SourceTable,
    pub longitude: f64,
    pub latitude: f64,
    /// The original row, unchanged.
    pub properties: Row,
}

/// How a reasoning call's response was used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The response was JSON as asked.
    Parsed,
    /// JSON was recovered from surrounding text.
    Extracted,
    /// Nothing usable came back; the stage fell back to an empty structure.
    Degraded { reason: String },
}

impl StageOutcome {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Maps a parse outcome, returning the parsed value alongside.
    pub fn from_parse<T>(outcome: ParseOutcome<T>) -> (Self, Option<T>) {
        debug!(parse = outcome.label(), "Parsed reasoning-service response");
        match outcome {
            ParseOutcome::Direct(value) => (Self::Parsed, Some(value)),
            ParseOutcome::Extracted(value) => (Self::Extracted, Some(value)),
            ParseOutcome::Failed { reason } => (Self::degraded(reason), None),
        }
    }
}

/// Execution counters for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Every generated query, rejected ones included.
    pub queries_attempted: usize,
    /// Queries that executed without error.
    pub queries_succeeded: usize,
    /// Queries the validator refused.
    pub queries_rejected: usize,
    /// Rows returned across all queries.
    pub rows_returned: usize,
    pub duration_ms: u64,
}

/// What ran for one query, as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub description: String,
    pub sql: String,
    pub row_count: usize,
    pub error: Option<String>,
}

/// A hypothesis as reported back to the caller, without row data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSummary {
    pub name: String,
    pub rationale: String,
    pub queries: Vec<QuerySummary>,
}

impl From<&Hypothesis> for HypothesisSummary {
    fn from(hypothesis: &Hypothesis) -> Self {
        Self {
            name: hypothesis.name.clone(),
            rationale: hypothesis.rationale.clone(),
            queries: hypothesis
                .queries
                .iter()
                .map(|q| QuerySummary {
                    description: q.description.clone(),
                    sql: q.sql.clone(),
                    row_count: q.result.as_ref().map(|r| r.row_count).unwrap_or_default(),
                    error: q.result.as_ref().and_then(|r| r.error.clone()),
                })
                .collect(),
        }
    }
}

/// The single response of an explore request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreResponse {
    pub title: String,
    pub summary: String,
    pub rows: Vec<AssembledRow>,
    pub follow_ups: Vec<String>,
    pub stats: ExecutionStats,
    pub hypotheses: Vec<HypothesisSummary>,
    pub generation: StageOutcome,
    pub evaluation: StageOutcome,
}

/// Reads a list element by element, dropping elements that do not fit `T`.
/// A value that is not a list reads as empty.
fn skip_invalid<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Json::Array(items) = Json::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "Dropped malformed element");
                None
            }
        })
        .collect())
}

/// Reads text, treating `null` as empty and other scalars as their JSON text.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Json::deserialize(deserializer)? {
        Json::Null => String::new(),
        Json::String(text) => text,
        other => other.to_string(),
    })
}

fn lenient_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Json::deserialize(deserializer)?;
    let index = match &value {
        Json::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Json::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    index.ok_or_else(|| D::Error::custom(format!("invalid index: {value}")))
}

fn lenient_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Json::deserialize(deserializer)?;
    match &value {
        Json::Null => Ok(0.0),
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("invalid score: {value}"))),
        Json::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| D::Error::custom(format!("invalid score: {value}"))),
        _ => Err(D::Error::custom(format!("invalid score: {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_classify_sale_record() {
        let r = row(json!({"address": "1 Main St", "sale_price": 500000}));
        assert_eq!(SourceTable::classify(&r), SourceTable::SoldProperties);
    }

    #[test]
    fn test_classify_zoning_record() {
        assert_eq!(
            SourceTable::classify(&row(json!({"zone_desc": "Residential"}))),
            SourceTable::Rzlt
        );
        assert_eq!(
            SourceTable::classify(&row(json!({"site_area": 1.2}))),
            SourceTable::Rzlt
        );
    }

    #[test]
    fn test_classify_planning_record() {
        assert_eq!(
            SourceTable::classify(&row(json!({"plan_ref": "D24A/0001"}))),
            SourceTable::DlrPlanning
        );
        assert_eq!(
            SourceTable::classify(&row(json!({"decision": "GRANT"}))),
            SourceTable::DlrPlanning
        );
    }

    #[test]
    fn test_classify_parcel_record() {
        assert_eq!(
            SourceTable::classify(&row(json!({"nationalcadastralreference": "DN123"}))),
            SourceTable::Cadastral
        );
        assert_eq!(
            SourceTable::classify(&row(json!({"area_sqm": 900}))),
            SourceTable::Cadastral
        );
        assert_eq!(
            SourceTable::classify(&row(json!({"area_sqm": 900, "address": "x"}))),
            SourceTable::Unknown
        );
    }

    #[test]
    fn test_classify_overlap_takes_first_match() {
        let r = row(json!({"address": "x", "sale_price": 1, "zone_desc": "z"}));
        assert_eq!(SourceTable::classify(&r), SourceTable::SoldProperties);
    }

    #[test]
    fn test_hypothesis_deserializes_with_alias_and_defaults() {
        let h: Hypothesis = serde_json::from_value(json!({
            "name": "Underused RZLT",
            "sql_queries": [{"description": "big sites", "sql": "SELECT 1"}]
        }))
        .unwrap();
        assert_eq!(h.rationale, "");
        assert_eq!(h.queries.len(), 1);
        assert!(h.queries[0].result.is_none());
    }

    #[test]
    fn test_evaluation_accepts_negative_indices() {
        let e: EvaluationResult = serde_json::from_value(json!({
            "title": "t",
            "ranked_sites": [{"hypothesis_index": -1, "query_index": 0, "row_index": 0}]
        }))
        .unwrap();
        assert_eq!(e.ranked_sites[0].reference(), (-1, 0, 0));
        assert_eq!(e.ranked_sites[0].score, 0.0);
    }

    #[test]
    fn test_malformed_picks_are_dropped_individually() {
        let e: EvaluationResult = serde_json::from_value(json!({
            "title": "Value pockets",
            "summary": "s",
            "ranked_sites": [
                {"hypothesis_index": 0, "query_index": 0, "row_index": 0, "score": 90},
                {"hypothesis_index": 0, "query_index": 0, "row_index": "1", "score": "75"},
                {"hypothesis_index": 0, "query_index": 0, "row_index": 2.0, "score": 60},
                {"hypothesis_index": 0, "query_index": 0, "row_index": "third", "score": 50},
                {"hypothesis_index": 0, "row_index": 4, "score": 40},
                {"hypothesis_index": 0, "query_index": 0, "row_index": 1.5},
                "site five"
            ],
            "follow_ups": ["Check flood zones", null, "Compare asking prices"]
        }))
        .unwrap();

        assert_eq!(e.title, "Value pockets");
        let refs: Vec<_> = e.ranked_sites.iter().map(RankedSite::reference).collect();
        assert_eq!(refs, vec![(0, 0, 0), (0, 0, 1), (0, 0, 2)]);
        assert_eq!(e.ranked_sites[1].score, 75.0);
        assert_eq!(e.follow_ups, vec!["Check flood zones", "Compare asking prices"]);
    }

    #[test]
    fn test_null_text_fields_read_as_empty() {
        let payload: GenerationPayload = serde_json::from_value(json!({
            "hypotheses": [
                {"name": "Idle RZLT", "rationale": null,
                 "queries": [{"description": null, "sql": "SELECT 1"}, 42]},
                "not a hypothesis",
                {"name": "Cheap sales", "rationale": "r", "queries": null}
            ]
        }))
        .unwrap();

        assert_eq!(payload.hypotheses.len(), 2);
        assert_eq!(payload.hypotheses[0].rationale, "");
        assert_eq!(payload.hypotheses[0].queries.len(), 1);
        assert_eq!(payload.hypotheses[0].queries[0].description, "");
        assert!(payload.hypotheses[1].queries.is_empty());
    }

    #[test]
    fn test_non_list_sites_read_as_empty() {
        let e: EvaluationResult =
            serde_json::from_value(json!({"title": "t", "ranked_sites": {"0": 1}})).unwrap();
        assert!(e.ranked_sites.is_empty());
        assert_eq!(e.title, "t");
    }

    #[test]
    fn test_stage_outcome_serialization() {
        assert_eq!(
            serde_json::to_value(StageOutcome::Parsed).unwrap(),
            json!({"status": "parsed"})
        );
        assert_eq!(
            serde_json::to_value(StageOutcome::degraded("no JSON")).unwrap(),
            json!({"status": "degraded", "reason": "no JSON"})
        );
    }

    #[test]
    fn test_hypothesis_summary() {
        let mut query = SqlQuery::new("q", "SELECT 1");
        query.result = Some(ExecutionResult::failed("boom"));
        let h = Hypothesis::new("h", "r").with_query(query);

        let summary = HypothesisSummary::from(&h);
        assert_eq!(summary.queries[0].error.as_deref(), Some("boom"));
        assert_eq!(summary.queries[0].row_count, 0);
    }
}
