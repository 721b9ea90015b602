//! Query Pipeline (spec.md §4.7): a fixed ordered sequence of stages over a single
//! vault's loaded state. Never mutates the store or sidecars; every stage's fail-open or
//! fail-closed behavior is decided here, not inside the stage itself.

pub mod stages;
pub mod trace;

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::bm25::Bm25Index;
use crate::embedding::{BiEncoder, CrossEncoder};
use crate::error::{Result, TemoaError};
use crate::profile::SearchProfile;
use crate::store::EmbeddingStore;
use crate::types::{GleaningStatusEntry, SearchResult};
use trace::Tracer;

pub use trace::PipelineTrace;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub vault: Option<String>,
    pub profile: Option<String>,
    pub limit: Option<usize>,
    pub hybrid: Option<bool>,
    pub rerank: Option<bool>,
    pub expand_query: Option<bool>,
    pub time_boost: Option<bool>,
    pub min_score: Option<f32>,
    pub include_types: Option<Vec<String>>,
    pub exclude_types: Option<Vec<String>>,
    pub trace: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub expanded_query: Option<String>,
    pub profile: String,
    pub results: Vec<SearchResult>,
    pub trace: Option<PipelineTrace>,
}

/// Read-only view over one vault's loaded state, assembled by [`crate::registry`] and
/// borrowed for the lifetime of a single search call.
pub struct SearchContext<'a> {
    pub store: &'a EmbeddingStore,
    pub bm25: &'a Bm25Index,
    pub bi_encoder: &'a BiEncoder,
    pub cross_encoder: Option<&'a CrossEncoder>,
    pub gleaning_status: &'a std::collections::BTreeMap<String, GleaningStatusEntry>,
    pub vault_root: &'a Path,
}

pub fn run(
    ctx: &SearchContext,
    profile_name: &str,
    profile: &SearchProfile,
    request: &SearchRequest,
    now: chrono::DateTime<chrono::Utc>,
    default_timeout_ms: u64,
) -> Result<SearchResponse> {
    if request.query.trim().is_empty() {
        return Err(TemoaError::search("query must not be empty"));
    }

    let pipeline_started = Instant::now();
    let budget_ms = request.timeout_ms.unwrap_or(default_timeout_ms);
    let budget = Duration::from_millis(budget_ms);

    let limit = request.limit.unwrap_or(10).clamp(1, 100);
    let hybrid_enabled = request.hybrid.unwrap_or(profile.hybrid_enabled);
    let rerank_enabled = request.rerank.unwrap_or(profile.rerank_enabled) && ctx.cross_encoder.is_some();
    let expand_enabled = request.expand_query.unwrap_or(profile.expand_query_enabled);
    let time_boost_enabled = request.time_boost.unwrap_or(true);
    let min_score = request.min_score.unwrap_or(0.3);
    let (include_types, exclude_types) =
        stages::effective_types(profile, &request.include_types, &request.exclude_types);

    let mut tracer = request.trace.then(Tracer::new);
    let mut query = request.query.clone();
    let mut expanded_query = None;

    // Stage 0 — query expansion (fail-open, opt-in).
    if expand_enabled && tokenize_len(&query) < 3 {
        let started = Instant::now();
        let probe = retrieve(ctx, &query, hybrid_enabled, limit)?;
        if let Some(expanded) = stages::expand_query(&query, &probe, ctx.store) {
            expanded_query = Some(expanded.clone());
            if let Some(t) = tracer.as_mut() {
                let mut meta = std::collections::BTreeMap::new();
                meta.insert("expanded_query".to_string(), expanded.clone());
                t.record(0, "expand_query", 0, &probe, started, meta);
            }
            query = expanded;
        }
        check_deadline(pipeline_started, budget, budget_ms)?;
    }

    // Stage 1 — primary retrieval (fatal on failure).
    let started = Instant::now();
    let mut results = retrieve(ctx, &query, hybrid_enabled, limit)?;
    if let Some(t) = tracer.as_mut() {
        t.record(1, "retrieve", 0, &results, started, Default::default());
    }
    check_deadline(pipeline_started, budget, budget_ms)?;

    // Stage 1.5 — chunk dedup.
    let started = Instant::now();
    let input_count = results.len();
    results = stages::dedup_chunks(results, profile.max_results_per_file);
    if let Some(t) = tracer.as_mut() {
        t.record(2, "dedup_chunks", input_count, &results, started, Default::default());
    }

    // Stage 2 — score threshold (semantic-only mode only).
    if !hybrid_enabled {
        let started = Instant::now();
        let input_count = results.len();
        results = stages::apply_score_threshold(results, min_score);
        if let Some(t) = tracer.as_mut() {
            t.record(3, "score_threshold", input_count, &results, started, Default::default());
        }
    }

    // Stage 3 — status filter.
    let started = Instant::now();
    let input_count = results.len();
    results = stages::apply_status_filter(results, ctx.store, ctx.gleaning_status);
    if let Some(t) = tracer.as_mut() {
        t.record(4, "status_filter", input_count, &results, started, Default::default());
    }

    // Stage 4 — type filter.
    let started = Instant::now();
    let input_count = results.len();
    results = stages::apply_type_filter(
        results,
        ctx.store,
        &include_types,
        &exclude_types,
        profile.max_age_days,
        now,
    );
    if let Some(t) = tracer.as_mut() {
        t.record(5, "type_filter", input_count, &results, started, Default::default());
    }

    // Stage 5 — cross-encoder rerank (fail-open).
    if rerank_enabled {
        if let Some(cross_encoder) = ctx.cross_encoder {
            let started = Instant::now();
            let input_count = results.len();
            match stages::rerank(results.clone(), cross_encoder, ctx.store, &query) {
                Ok(reranked) => {
                    results = reranked;
                    if let Some(t) = tracer.as_mut() {
                        t.record(6, "rerank", input_count, &results, started, Default::default());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Stage 5 rerank failed, continuing with pre-rerank ranking");
                }
            }
        }
        check_deadline(pipeline_started, budget, budget_ms)?;
    }

    // Stage 6 — time-aware boost (fail-open; must run after Stage 5).
    if time_boost_enabled {
        let started = Instant::now();
        let input_count = results.len();
        results = stages::apply_time_boost(
            results,
            ctx.store,
            ctx.vault_root,
            profile.max_boost,
            profile.half_life_days,
            now,
        );
        if let Some(t) = tracer.as_mut() {
            t.record(7, "time_boost", input_count, &results, started, Default::default());
        }
    }

    // Stage 7 — top-K selection.
    let started = Instant::now();
    let input_count = results.len();
    results = stages::select_top_k(results, limit);
    if let Some(t) = tracer.as_mut() {
        t.record(8, "top_k", input_count, &results, started, Default::default());
    }

    Ok(SearchResponse {
        query: request.query.clone(),
        expanded_query,
        profile: profile_name.to_string(),
        results,
        trace: tracer.map(Tracer::finish),
    })
}

/// Checked after each suspension-point stage (spec.md §5: model inference is where a slow
/// query actually spends its time). A timeout here means the caller gets a clean failure
/// rather than a response assembled from a partial, over-budget pipeline run.
fn check_deadline(pipeline_started: Instant, budget: Duration, budget_ms: u64) -> Result<()> {
    let elapsed = pipeline_started.elapsed();
    if elapsed > budget {
        return Err(TemoaError::search_timeout(elapsed.as_millis() as u64, budget_ms));
    }
    Ok(())
}

fn retrieve(ctx: &SearchContext, query: &str, hybrid_enabled: bool, limit: usize) -> Result<Vec<SearchResult>> {
    if hybrid_enabled {
        stages::retrieve_hybrid(ctx.store, ctx.bm25, ctx.bi_encoder, query, limit)
    } else {
        stages::retrieve_semantic_only(ctx.store, ctx.bi_encoder, query)
    }
}

fn tokenize_len(query: &str) -> usize {
    query.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_deadline_passes_within_budget() {
        let started = Instant::now();
        assert!(check_deadline(started, Duration::from_secs(60), 60_000).is_ok());
    }

    #[test]
    fn check_deadline_fails_once_budget_elapses() {
        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        let result = check_deadline(started, Duration::from_millis(1), 1);
        assert!(matches!(result, Err(TemoaError::SearchTimeout { .. })));
    }
}
