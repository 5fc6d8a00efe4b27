//! Resolves ranking picks into concrete rows and builds the final list.
//!
//! Picks are index triples produced by the model and are bounds-checked
//! before use. When no pick resolves but rows exist, a deterministic
//! fallback takes the first rows of every query instead.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::ExploreConfig;
use crate::explore::geometry::derive_coordinates;
use crate::explore::types::{AssembledRow, EvaluationResult, Hypothesis, SourceTable};
use crate::query::Row;

/// Score given to rows chosen by the fallback path.
pub const FALLBACK_SCORE: f64 = 50.0;

/// Rows taken from each query by the fallback path.
pub const FALLBACK_ROWS_PER_QUERY: usize = 3;

/// The final list plus bookkeeping about how it was built.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub rows: Vec<AssembledRow>,
    /// Picks that pointed outside the hypothesis tree.
    pub out_of_range: usize,
    /// Picks repeating an earlier triple.
    pub duplicates: usize,
    /// Rows dropped for lack of coordinates.
    pub without_coordinates: usize,
    pub used_fallback: bool,
}

pub struct Assembler {
    max_sites: usize,
    fallback_limit: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self {
            max_sites: 15,
            fallback_limit: 15,
        }
    }
}

impl Assembler {
    pub fn new(max_sites: usize, fallback_limit: usize) -> Self {
        Self {
            max_sites,
            fallback_limit,
        }
    }

    pub fn from_config(config: &ExploreConfig) -> Self {
        Self::new(config.max_sites, config.fallback_limit)
    }

    pub fn assemble(&self, hypotheses: &[Hypothesis], evaluation: &EvaluationResult) -> Assembly {
        let mut assembly = Assembly::default();
        let mut seen = HashSet::new();
        let mut picks: Vec<(&Row, f64, &str)> = Vec::new();

        for site in &evaluation.ranked_sites {
            if !seen.insert(site.reference()) {
                assembly.duplicates += 1;
                continue;
            }
            match resolve(hypotheses, site.reference()) {
                Some(row) => picks.push((row, site.score.clamp(0.0, 100.0), site.reason.as_str())),
                None => {
                    debug!(reference = ?site.reference(), "Dropped out-of-range pick");
                    assembly.out_of_range += 1;
                }
            }
        }

        if picks.is_empty() && has_rows(hypotheses) {
            info!(
                out_of_range = assembly.out_of_range,
                "No usable picks, falling back to first rows"
            );
            assembly.used_fallback = true;
            let candidates = fallback_candidates(hypotheses);
            self.fill(&mut assembly, candidates, self.fallback_limit);
        } else {
            let candidates = picks
                .into_iter()
                .map(|(row, score, reason)| (row, score, reason.to_string()));
            self.fill(&mut assembly, candidates, self.max_sites);
        }

        assembly
    }

    fn fill<'a>(
        &self,
        assembly: &mut Assembly,
        candidates: impl IntoIterator<Item = (&'a Row, f64, String)>,
        limit: usize,
    ) {
        for (row, score, reason) in candidates {
            if assembly.rows.len() >= limit {
                break;
            }
            let Some((longitude, latitude)) = derive_coordinates(row) else {
                assembly.without_coordinates += 1;
                continue;
            };
            assembly.rows.push(AssembledRow {
                rank: assembly.rows.len(),
                score,
                reason,
                source_table: SourceTable::classify(row),
                longitude,
                latitude,
                properties: row.clone(),
            });
        }
    }
}

/// Dereferences `hypotheses[h].queries[q].result.rows[r]`, checking every index.
pub fn resolve(hypotheses: &[Hypothesis], (h, q, r): (i64, i64, i64)) -> Option<&Row> {
    let h = usize::try_from(h).ok()?;
    let q = usize::try_from(q).ok()?;
    let r = usize::try_from(r).ok()?;
    hypotheses.get(h)?.queries.get(q)?.rows().get(r)
}

fn has_rows(hypotheses: &[Hypothesis]) -> bool {
    hypotheses
        .iter()
        .flat_map(|h| &h.queries)
        .any(|q| !q.rows().is_empty())
}

fn fallback_candidates(hypotheses: &[Hypothesis]) -> Vec<(&Row, f64, String)> {
    hypotheses
        .iter()
        .flat_map(|h| h.queries.iter().map(move |q| (h, q)))
        .flat_map(|(h, q)| {
            q.rows()
                .iter()
                .take(FALLBACK_ROWS_PER_QUERY)
                .map(move |row| (row, FALLBACK_SCORE, format!("Matched hypothesis: {}", h.name)))
        })
        .collect()
}
