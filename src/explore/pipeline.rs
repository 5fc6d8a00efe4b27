//! The explore pipeline: generate, validate, execute, evaluate, assemble.
//!
//! One call of [`ExplorePipeline::run`] serves one request. The two
//! reasoning calls are sequential and each has its own deadline; exceeding
//! either fails the whole request. Query failures and validator rejections
//! are recorded per query and never abort the request.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExploreConfig;
use crate::db::ConnectionPool;
use crate::error::{LandosError, Result};
use crate::explore::assembler::Assembler;
use crate::explore::evaluator::Evaluator;
use crate::explore::generator::HypothesisGenerator;
use crate::explore::types::{ExecutionStats, ExploreResponse, Hypothesis, HypothesisSummary};
use crate::llm::{Conversation, LlmClient};
use crate::query::{ExecutionResult, QueryExecutor};
use crate::safety;

/// Follow-up suggestions kept in the response.
pub const MAX_FOLLOW_UPS: usize = 3;

/// Prefix of the error recorded on a query the validator refused.
pub const REJECTED_PREFIX: &str = "Rejected: ";

/// Sequences the pipeline stages for one request at a time.
pub struct ExplorePipeline {
    generator: HypothesisGenerator,
    evaluator: Evaluator,
    executor: QueryExecutor,
    assembler: Assembler,
    generation_timeout: Duration,
    evaluation_timeout: Duration,
    max_concurrent_queries: usize,
}

impl ExplorePipeline {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        llm: Arc<dyn LlmClient>,
        config: &ExploreConfig,
    ) -> Self {
        Self {
            generator: HypothesisGenerator::from_config(Arc::clone(&llm), config),
            evaluator: Evaluator::from_config(llm, config),
            executor: QueryExecutor::from_config(pool, config),
            assembler: Assembler::from_config(config),
            generation_timeout: config.generation_timeout(),
            evaluation_timeout: config.evaluation_timeout(),
            max_concurrent_queries: config.max_concurrent_queries.max(1),
        }
    }

    /// Runs the pipeline for a conversation.
    pub async fn run(&self, conversation: &Conversation) -> Result<ExploreResponse> {
        self.run_with_cancel(conversation, &CancellationToken::new())
            .await
    }

    /// Runs the pipeline, failing with [`LandosError::Cancelled`] once the
    /// token is cancelled. Reasoning calls are abandoned immediately; queries
    /// already running finish and clean up their sessions first.
    pub async fn run_with_cancel(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> Result<ExploreResponse> {
        let started = Instant::now();
        conversation.ensure_turns()?;
        let user_query = conversation
            .last_user_message()
            .ok_or_else(|| LandosError::invalid_request("conversation has no user message"))?;

        info!(messages = conversation.len(), "Explore request started");

        let generation = cancellable(
            cancel,
            tokio::time::timeout(self.generation_timeout, self.generator.generate(conversation)),
        )
        .await?
        .map_err(|_| {
            LandosError::timeout(format!(
                "hypothesis generation exceeded {}s",
                self.generation_timeout.as_secs()
            ))
        })??;

        let mut hypotheses = generation.hypotheses;
        // Execution is not raced against the token: running queries finish
        // and clean up their sessions, queries not yet started are skipped.
        let mut stats = self.execute_all(&mut hypotheses, cancel).await;
        if cancel.is_cancelled() {
            return Err(LandosError::Cancelled);
        }

        let evaluation = cancellable(
            cancel,
            tokio::time::timeout(
                self.evaluation_timeout,
                self.evaluator.evaluate(user_query, &hypotheses),
            ),
        )
        .await?
        .map_err(|_| {
            LandosError::timeout(format!(
                "evaluation exceeded {}s",
                self.evaluation_timeout.as_secs()
            ))
        })?;

        let assembly = self.assembler.assemble(&hypotheses, &evaluation.result);
        let mut result = evaluation.result;
        result.follow_ups.truncate(MAX_FOLLOW_UPS);

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            queries_attempted = stats.queries_attempted,
            queries_succeeded = stats.queries_succeeded,
            queries_rejected = stats.queries_rejected,
            rows_returned = stats.rows_returned,
            sites = assembly.rows.len(),
            fallback = assembly.used_fallback,
            duration_ms = stats.duration_ms,
            "Explore request finished"
        );

        Ok(ExploreResponse {
            title: result.title,
            summary: result.summary,
            rows: assembly.rows,
            follow_ups: result.follow_ups,
            stats,
            hypotheses: hypotheses.iter().map(HypothesisSummary::from).collect(),
            generation: generation.outcome,
            evaluation: evaluation.outcome,
        })
    }

    /// Validates and executes every query, attaching results in place.
    async fn execute_all(
        &self,
        hypotheses: &mut [Hypothesis],
        cancel: &CancellationToken,
    ) -> ExecutionStats {
        let jobs: Vec<(usize, usize, String)> = hypotheses
            .iter()
            .enumerate()
            .flat_map(|(hi, h)| {
                h.queries
                    .iter()
                    .enumerate()
                    .map(move |(qi, q)| (hi, qi, q.sql.clone()))
            })
            .collect();

        let mut stats = ExecutionStats {
            queries_attempted: jobs.len(),
            ..ExecutionStats::default()
        };

        let results: Vec<(usize, usize, ExecutionResult, bool)> = stream::iter(jobs)
            .map(|(hi, qi, sql)| async move {
                if cancel.is_cancelled() {
                    return (hi, qi, ExecutionResult::failed("request cancelled"), false);
                }
                match safety::validate(&sql) {
                    Ok(vetted) => {
                        if !vetted.is_clean() {
                            debug!(
                                hypothesis = hi,
                                query = qi,
                                tables = ?vetted.unrecognized_tables,
                                "Executing query with unrecognized table references"
                            );
                        }
                        (hi, qi, self.executor.execute(&sql).await, false)
                    }
                    Err(rejection) => {
                        let result =
                            ExecutionResult::failed(format!("{}{}", REJECTED_PREFIX, rejection));
                        (hi, qi, result, true)
                    }
                }
            })
            .buffered(self.max_concurrent_queries)
            .collect()
            .await;

        for (hi, qi, result, rejected) in results {
            if rejected {
                stats.queries_rejected += 1;
            } else if result.is_success() {
                stats.queries_succeeded += 1;
                stats.rows_returned += result.row_count;
            } else {
                warn!(hypothesis = hi, query = qi, "Query produced no rows due to an error");
            }
            hypotheses[hi].queries[qi].result = Some(result);
        }

        stats
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LandosError::Cancelled),
        output = future => Ok(output),
    }
}
