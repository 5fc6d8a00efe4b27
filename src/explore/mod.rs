//! Hypothesis-driven exploration.
//!
//! A free-text question becomes a set of hypotheses with generated SQL; the
//! SQL is vetted and executed, the results are ranked by the reasoning
//! service, and the picks are resolved into map-ready rows.

pub mod assembler;
pub mod evaluator;
pub mod generator;
pub mod geometry;
pub mod pipeline;
pub mod types;

pub use assembler::{Assembler, Assembly};
pub use evaluator::{Evaluation, Evaluator};
pub use generator::{Generation, HypothesisGenerator};
pub use pipeline::ExplorePipeline;
pub use types::{
    AssembledRow, EvaluationResult, ExecutionStats, ExploreResponse, Hypothesis,
    HypothesisSummary, QuerySummary, RankedSite, SourceTable, SqlQuery, StageOutcome,
};
