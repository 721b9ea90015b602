//! The eight query pipeline stages (spec.md §4.7), each a free function over a result
//! list plus whatever slice of engine state it needs. `pipeline::mod` sequences them and
//! owns the fail-open/fail-closed policy; the stages themselves just compute.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::warn;

use crate::bm25::Bm25Index;
use crate::embedding::{BiEncoder, CrossEncoder};
use crate::profile::SearchProfile;
use crate::store::EmbeddingStore;
use crate::types::{GleaningStatus, GleaningStatusEntry, IndexedMetadata, SearchResult};

/// RRF's rank-damping constant (spec.md §4.7 Stage 1), standard across the literature.
const RRF_K: f64 = 60.0;
/// Tag-boosted candidates are promoted to a multiple of the observed max RRF score.
/// The spec leaves the exact constant an open question within 1.5-2.0x; the midpoint is
/// used here and the choice is recorded in DESIGN.md.
const TAG_BOOST_MULTIPLIER: f64 = 1.75;
const SEMANTIC_ONLY_TOP_K: usize = 100;
const RERANK_CANDIDATE_CAP: usize = 100;

fn snippet_from(meta: &IndexedMetadata) -> String {
    const SNIPPET_LEN: usize = 240;
    let content = meta.content.trim();
    if content.len() <= SNIPPET_LEN {
        content.to_string()
    } else {
        let cut = (0..=SNIPPET_LEN).rev().find(|&i| content.is_char_boundary(i)).unwrap_or(0);
        format!("{}…", &content[..cut])
    }
}

fn result_from_row(store: &EmbeddingStore, row: usize) -> SearchResult {
    let meta = &store.metadata[row];
    SearchResult {
        relative_path: meta.file_path.clone(),
        title: meta.title.clone(),
        snippet: snippet_from(meta),
        is_chunked_file: meta.is_chunked_file,
        chunk_index: meta.chunk_index,
        chunk_total: meta.chunk_total,
        matched_chunks: 1,
        row_index: row,
        ..Default::default()
    }
}

/// Whichever ranking score is currently authoritative for a result: the cross-encoder
/// score once Stage 5 has run, else the RRF score in hybrid mode, else raw similarity.
fn current_score(r: &SearchResult) -> f64 {
    if let Some(ce) = r.cross_encoder_score {
        return ce as f64;
    }
    if let Some(rrf) = r.rrf_score {
        return rrf;
    }
    r.similarity_score.map(|s| s as f64).unwrap_or(r.final_score)
}

// ---------------------------------------------------------------------------
// Stage 0 — Query expansion
// ---------------------------------------------------------------------------

/// Hand-rolled term-frequency expansion: counts terms across the top 5 results' content
/// (a stand-in for fitting a TF-IDF vectorizer, proportionate to this corpus's size) and
/// appends the top 3 terms not already present in the query. Fails open to the original
/// query on any empty input.
pub fn expand_query(query: &str, top_results: &[SearchResult], store: &EmbeddingStore) -> Option<String> {
    if top_results.is_empty() {
        return None;
    }
    let existing: BTreeSet<String> = tokenize(query).into_iter().collect();

    let mut freq: BTreeMap<String, usize> = BTreeMap::new();
    for r in top_results.iter().take(5) {
        let content = &store.metadata[r.row_index].content;
        for term in tokenize(content) {
            if !existing.contains(&term) && term.len() > 2 {
                *freq.entry(term).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let terms: Vec<String> = ranked.into_iter().take(3).map(|(t, _)| t).collect();
    if terms.is_empty() {
        return None;
    }
    Some(format!("{query} {}", terms.join(" ")))
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase().split_whitespace().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Stage 1 — Primary retrieval
// ---------------------------------------------------------------------------

pub fn semantic_search(
    store: &EmbeddingStore,
    bi_encoder: &BiEncoder,
    query: &str,
    top_n: usize,
) -> crate::error::Result<Vec<(usize, f32)>> {
    if store.rows() == 0 {
        return Ok(Vec::new());
    }
    let query_vec = bi_encoder.encode(&[query.to_string()], 1)?.remove(0);
    let sims = bi_encoder.similarity(&query_vec, &store.matrix, store.dim);
    let mut ranked: Vec<(usize, f32)> = sims.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_n);
    Ok(ranked)
}

pub fn retrieve_semantic_only(
    store: &EmbeddingStore,
    bi_encoder: &BiEncoder,
    query: &str,
) -> crate::error::Result<Vec<SearchResult>> {
    let hits = semantic_search(store, bi_encoder, query, SEMANTIC_ONLY_TOP_K)?;
    Ok(hits
        .into_iter()
        .map(|(row, sim)| {
            let mut r = result_from_row(store, row);
            r.similarity_score = Some(sim);
            r.final_score = sim as f64;
            r
        })
        .collect())
}

pub fn retrieve_hybrid(
    store: &EmbeddingStore,
    bm25: &Bm25Index,
    bi_encoder: &BiEncoder,
    query: &str,
    limit: usize,
) -> crate::error::Result<Vec<SearchResult>> {
    let fetch_n = (limit * 3).max(1);
    let semantic_hits = semantic_search(store, bi_encoder, query, fetch_n)?;
    let bm25_hits = bm25.search(query, fetch_n);

    let mut rrf: BTreeMap<usize, f64> = BTreeMap::new();
    let mut similarity_by_row: BTreeMap<usize, f32> = BTreeMap::new();
    let mut bm25_by_row: BTreeMap<usize, f64> = BTreeMap::new();
    let mut tags_by_row: BTreeMap<usize, Vec<String>> = BTreeMap::new();

    for (rank, (row, sim)) in semantic_hits.iter().enumerate() {
        *rrf.entry(*row).or_insert(0.0) += 1.0 / (RRF_K + (rank + 1) as f64);
        similarity_by_row.insert(*row, *sim);
    }
    for (rank, hit) in bm25_hits.iter().enumerate() {
        *rrf.entry(hit.row_index).or_insert(0.0) += 1.0 / (RRF_K + (rank + 1) as f64);
        bm25_by_row.insert(hit.row_index, hit.score);
        if !hit.tags_matched.is_empty() {
            tags_by_row.insert(hit.row_index, hit.tags_matched.clone());
        }
    }

    let max_rrf = rrf.values().cloned().fold(0.0_f64, f64::max);

    let mut results: Vec<SearchResult> = rrf
        .into_iter()
        .map(|(row, score)| {
            let tags_matched = tags_by_row.remove(&row).unwrap_or_default();
            let tag_boosted = !tags_matched.is_empty();
            // Special preservation rule (spec.md §4.7 Stage 1): never let the promotion
            // lower a score the fusion already ranked highly.
            let rrf_score = if tag_boosted { score.max(max_rrf * TAG_BOOST_MULTIPLIER) } else { score };

            let mut r = result_from_row(store, row);
            r.similarity_score = similarity_by_row.get(&row).copied();
            r.bm25_score = bm25_by_row.get(&row).copied();
            r.rrf_score = Some(rrf_score);
            r.tags_matched = tags_matched;
            r.tag_boosted = tag_boosted;
            r.final_score = rrf_score;
            r
        })
        .collect();

    results.sort_by(|a, b| {
        b.rrf_score.partial_cmp(&a.rrf_score).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(results)
}

// ---------------------------------------------------------------------------
// Stage 1.5 — Chunk deduplication
// ---------------------------------------------------------------------------

/// Keep up to `max_results_per_file` chunks per file (1 = "best" mode), sorted by the
/// group's own ranking within the file, annotated with how many chunks matched overall.
pub fn dedup_chunks(results: Vec<SearchResult>, max_results_per_file: usize) -> Vec<SearchResult> {
    let mut groups: BTreeMap<String, Vec<SearchResult>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for r in results {
        if !groups.contains_key(&r.relative_path) {
            order.push(r.relative_path.clone());
        }
        groups.entry(r.relative_path.clone()).or_default().push(r);
    }

    let mut out = Vec::new();
    for path in order {
        let mut group = groups.remove(&path).unwrap();
        group.sort_by(|a, b| current_score(b).partial_cmp(&current_score(a)).unwrap_or(std::cmp::Ordering::Equal));
        let matched = group.len();
        let keep = max_results_per_file.max(1).min(group.len());
        for mut r in group.into_iter().take(keep) {
            r.matched_chunks = matched;
            out.push(r);
        }
    }
    out.sort_by(|a, b| current_score(b).partial_cmp(&current_score(a)).unwrap_or(std::cmp::Ordering::Equal));
    out
}

// ---------------------------------------------------------------------------
// Stage 2 — Score threshold (semantic-only mode only)
// ---------------------------------------------------------------------------

pub fn apply_score_threshold(results: Vec<SearchResult>, min_score: f32) -> Vec<SearchResult> {
    results.into_iter().filter(|r| r.similarity_score.unwrap_or(0.0) >= min_score).collect()
}

// ---------------------------------------------------------------------------
// Stage 3 — Status filter
// ---------------------------------------------------------------------------

pub fn apply_status_filter(
    results: Vec<SearchResult>,
    store: &EmbeddingStore,
    gleaning_status: &BTreeMap<String, GleaningStatusEntry>,
) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| {
            let Some(id) = store.metadata[r.row_index].gleaning_id() else { return true };
            match gleaning_status.get(&id) {
                Some(entry) => !matches!(entry.status, GleaningStatus::Inactive | GleaningStatus::Hidden),
                None => true,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stage 4 — Type filter
// ---------------------------------------------------------------------------

pub fn apply_type_filter(
    results: Vec<SearchResult>,
    store: &EmbeddingStore,
    include_types: &[String],
    exclude_types: &[String],
    max_age_days: Option<f64>,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| {
            let meta = &store.metadata[r.row_index];
            let types = meta.types();

            if !include_types.is_empty() && !types.iter().any(|t| include_types.contains(t)) {
                return false;
            }
            if types.iter().any(|t| exclude_types.contains(t)) {
                return false;
            }
            if let Some(max_age) = max_age_days {
                let days_old = days_old(meta.mtime, now);
                if days_old > max_age {
                    return false;
                }
            }
            true
        })
        .collect()
}

fn days_old(mtime: i64, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let now_secs = now.timestamp();
    ((now_secs - mtime).max(0) as f64) / 86_400.0
}

// ---------------------------------------------------------------------------
// Stage 5 — Cross-encoder re-ranking
// ---------------------------------------------------------------------------

/// Rerank the top candidates, exempting `tag_boosted` results: they keep their original
/// position and non-exempt results are slotted into the remaining positions in
/// cross-encoder order (spec.md §4.7 Stage 5, invariant 7).
pub fn rerank(
    results: Vec<SearchResult>,
    cross_encoder: &CrossEncoder,
    store: &EmbeddingStore,
    query: &str,
) -> crate::error::Result<Vec<SearchResult>> {
    rerank_with(results, |q, passages| cross_encoder.score(q, passages), store, query)
}

/// Does the actual work of [`rerank`], taking the scoring function as a parameter so tests
/// can exercise the exemption/interleaving logic without a real cross-encoder model loaded.
fn rerank_with(
    mut results: Vec<SearchResult>,
    score: impl FnOnce(&str, &[String]) -> crate::error::Result<Vec<f32>>,
    store: &EmbeddingStore,
    query: &str,
) -> crate::error::Result<Vec<SearchResult>> {
    let cap = RERANK_CANDIDATE_CAP.min(results.len());
    if cap == 0 {
        return Ok(results);
    }

    let tail = results.split_off(cap);
    let candidates = results;

    let passages: Vec<String> =
        candidates.iter().map(|r| store.metadata[r.row_index].content.clone()).collect();
    let scores = score(query, &passages)?;

    let exempt_positions: Vec<bool> = candidates.iter().map(|r| r.tag_boosted).collect();
    let mut rerank_pool: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| !exempt_positions[*i])
        .map(|(i, _)| (i, scores[i]))
        .collect();
    rerank_pool.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut pool_iter = rerank_pool.into_iter();

    let mut reranked = Vec::with_capacity(candidates.len());
    for (i, mut r) in candidates.into_iter().enumerate() {
        if exempt_positions[i] {
            reranked.push(r);
        } else {
            let (_, score) = pool_iter.next().expect("pool covers every non-exempt slot");
            r.cross_encoder_score = Some(score);
            r.final_score = score as f64;
            reranked.push(r);
        }
    }

    reranked.extend(tail);
    Ok(reranked)
}

// ---------------------------------------------------------------------------
// Stage 6 — Time-aware boost
// ---------------------------------------------------------------------------

pub fn apply_time_boost(
    results: Vec<SearchResult>,
    store: &EmbeddingStore,
    vault_root: &Path,
    max_boost: f64,
    half_life_days: f64,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<SearchResult> {
    results
        .into_iter()
        .map(|mut r| {
            if crate::types::validate_under_root(vault_root, &r.relative_path).is_err() {
                warn!(path = %r.relative_path, "skipping time boost: path does not resolve under vault root");
                return r;
            }
            let meta = &store.metadata[r.row_index];
            let days_old = days_old(meta.mtime, now);
            let boost_factor = max_boost * 0.5_f64.powf(days_old / half_life_days.max(0.0001));
            let base = current_score(&r);
            let boosted = base * (1.0 + boost_factor);
            r.time_boost_factor = Some(boost_factor);
            r.boosted_score = Some(boosted);
            r.final_score = boosted;
            r
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stage 7 — Top-K selection
// ---------------------------------------------------------------------------

pub fn select_top_k(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    // `tag_boosted` is the primary key: Stage 5 exempts tag-boosted results from reranking
    // and keeps them on the RRF scale, so a plain descending sort on `final_score` alone
    // would let a reranked result's unbounded cross-encoder score outrank a tag-boosted
    // result it previously led (invariant 7). Sorting tag-boosted results above all others
    // first, then by `final_score` within each group, preserves that exemption through the
    // final cut.
    results.sort_by(|a, b| {
        b.tag_boosted
            .cmp(&a.tag_boosted)
            .then_with(|| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal))
    });
    results.truncate(limit);
    for r in &mut results {
        r.score_breakdown.insert("final_score".to_string(), r.final_score);
        if let Some(v) = r.similarity_score {
            r.score_breakdown.insert("similarity_score".to_string(), v as f64);
        }
        if let Some(v) = r.bm25_score {
            r.score_breakdown.insert("bm25_score".to_string(), v);
        }
        if let Some(v) = r.rrf_score {
            r.score_breakdown.insert("rrf_score".to_string(), v);
        }
        if let Some(v) = r.cross_encoder_score {
            r.score_breakdown.insert("cross_encoder_score".to_string(), v as f64);
        }
        if let Some(v) = r.time_boost_factor {
            r.score_breakdown.insert("time_boost_factor".to_string(), v);
        }
    }
    results
}

/// Resolve a profile's effective include/exclude type lists against a request override.
pub fn effective_types(profile: &SearchProfile, request_include: &Option<Vec<String>>, request_exclude: &Option<Vec<String>>) -> (Vec<String>, Vec<String>) {
    let include = request_include.clone().unwrap_or_else(|| profile.include_types.clone());
    let exclude = request_exclude.clone().unwrap_or_else(|| profile.exclude_types.clone());
    (include, exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrontMatter;

    fn store_with(entries: Vec<IndexedMetadata>) -> EmbeddingStore {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = EmbeddingStore::new_empty(dir.path(), "test-model", 1).unwrap();
        let vectors: Vec<Vec<f32>> = entries.iter().map(|_| vec![0.0]).collect();
        store.append(vectors, entries);
        store
    }

    fn meta(path: &str, tags: &[&str], mtime: i64) -> IndexedMetadata {
        IndexedMetadata {
            file_path: path.to_string(),
            title: path.to_string(),
            content: "some content".to_string(),
            front_matter: FrontMatter::new(),
            chunk_index: 0,
            chunk_total: 1,
            is_chunked_file: false,
            tags_lower: tags.iter().map(|t| t.to_string()).collect(),
            mtime,
        }
    }

    #[test]
    fn dedup_chunks_keeps_best_mode_single_result_per_file() {
        let store = store_with(vec![meta("a.md", &[], 0), meta("a.md", &[], 0)]);
        let mut results = vec![result_from_row(&store, 0), result_from_row(&store, 1)];
        results[0].final_score = 0.9;
        results[0].rrf_score = Some(0.9);
        results[1].final_score = 0.5;
        results[1].rrf_score = Some(0.5);

        let deduped = dedup_chunks(results, 1);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].matched_chunks, 2);
    }

    #[test]
    fn status_filter_drops_inactive_and_keeps_unknown_ids() {
        let mut front_matter = FrontMatter::new();
        front_matter.insert(
            "gleaning_id".to_string(),
            crate::types::FrontMatterValue::String("g1".to_string()),
        );
        let mut inactive_meta = meta("a.md", &[], 0);
        inactive_meta.front_matter = front_matter;
        let store = store_with(vec![inactive_meta, meta("b.md", &[], 0)]);

        let mut status = BTreeMap::new();
        status.insert(
            "g1".to_string(),
            GleaningStatusEntry {
                status: GleaningStatus::Inactive,
                reason: String::new(),
                updated_at: chrono::Utc::now(),
                history: Vec::new(),
            },
        );

        let results = vec![result_from_row(&store, 0), result_from_row(&store, 1)];
        let filtered = apply_status_filter(results, &store, &status);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].relative_path, "b.md");
    }

    #[test]
    fn type_filter_respects_exclude_list() {
        let mut front_matter = FrontMatter::new();
        front_matter.insert(
            "type".to_string(),
            crate::types::FrontMatterValue::String("daily".to_string()),
        );
        let mut daily_meta = meta("daily.md", &[], 0);
        daily_meta.front_matter = front_matter;
        let store = store_with(vec![daily_meta, meta("note.md", &[], 0)]);

        let results = vec![result_from_row(&store, 0), result_from_row(&store, 1)];
        let filtered = apply_type_filter(results, &store, &[], &["daily".to_string()], None, chrono::Utc::now());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].relative_path, "note.md");
    }

    #[test]
    fn top_k_sorts_descending_and_truncates() {
        let store = store_with(vec![meta("a.md", &[], 0), meta("b.md", &[], 0), meta("c.md", &[], 0)]);
        let mut results = vec![result_from_row(&store, 0), result_from_row(&store, 1), result_from_row(&store, 2)];
        results[0].final_score = 0.2;
        results[1].final_score = 0.9;
        results[2].final_score = 0.5;

        let top = select_top_k(results, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].relative_path, "b.md");
        assert_eq!(top[1].relative_path, "c.md");
    }

    #[test]
    fn time_boost_ranks_recent_file_above_old_file_with_equal_similarity() {
        // Scenario S4: two files with identical similarity, one modified today, one
        // modified two years ago. Defaults max_boost=0.2, half_life_days=90.
        let now = chrono::Utc::now();
        let today_secs = now.timestamp();
        let two_years_ago_secs = today_secs - 2 * 365 * 86_400;

        let store = store_with(vec![meta("recent.md", &[], today_secs), meta("old.md", &[], two_years_ago_secs)]);
        // apply_time_boost validates that each result's path resolves under the vault
        // root, so the files must actually exist on disk for this test.
        std::fs::write(store.vault_path.join("recent.md"), "content").unwrap();
        std::fs::write(store.vault_path.join("old.md"), "content").unwrap();
        let mut a = result_from_row(&store, 0);
        a.similarity_score = Some(0.80);
        a.final_score = 0.80;
        let mut b = result_from_row(&store, 1);
        b.similarity_score = Some(0.80);
        b.final_score = 0.80;

        let boosted = apply_time_boost(vec![a, b], &store, store.vault_path.as_path(), 0.2, 90.0, now);
        let recent = boosted.iter().find(|r| r.relative_path == "recent.md").unwrap();
        let old = boosted.iter().find(|r| r.relative_path == "old.md").unwrap();

        assert!(recent.final_score > old.final_score);
        assert!((recent.final_score - 0.96).abs() < 0.01, "expected ~0.80 * 1.20, got {}", recent.final_score);
        // Old file's boost factor has decayed to effectively nothing after 2 years vs a
        // 90-day half life.
        assert!(old.final_score < recent.final_score * 0.9);
    }

    #[test]
    fn tag_boosted_result_is_never_outranked_by_rerank_relative_to_results_it_led_going_in() {
        // Invariant 7: a tag_boosted result's rank never drops below a non-tag-boosted
        // result it outranked before Stage 5, since it is exempted from reranking.
        let store = store_with(vec![meta("tagged.md", &["zettelkasten"], 0), meta("plain.md", &[], 0)]);
        let mut tagged = result_from_row(&store, 0);
        tagged.tag_boosted = true;
        tagged.final_score = 10.0; // leads going into Stage 5
        let mut plain = result_from_row(&store, 1);
        plain.final_score = 1.0;

        // A hostile scorer: give the non-exempt result a huge cross-encoder score while
        // the exempt result's passage would otherwise be penalized if it weren't skipped.
        let reranked = rerank_with(
            vec![tagged, plain],
            |_query, passages| Ok(passages.iter().map(|_| 99.0_f32).collect()),
            &store,
            "zettelkasten",
        )
        .unwrap();

        let top = select_top_k(reranked, 10);

        assert_eq!(top[0].relative_path, "tagged.md");
        assert!(top[0].tag_boosted);
        assert_eq!(top[0].final_score, 10.0);
        assert_eq!(top[1].relative_path, "plain.md");
        assert_eq!(top[1].cross_encoder_score, Some(99.0));
    }
}
