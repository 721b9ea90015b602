//! BM25 Index (spec.md §4.5): tokenized keyword index with tag-aware boosting and
//! description weighting. Hand-rolled rather than pulled from an external BM25 crate,
//! grounded in this lineage's own pre-existing IDF-weighted scoring
//! (`TermDocFreq`/`grep_relevance_score`) rather than a fabricated dependency — see
//! DESIGN.md.
//!
//! Rebuilt from scratch on every index save (spec.md §4.5); its runtime is small compared
//! to embedding work, so no incremental BM25 maintenance is attempted.

use std::collections::HashMap;

use crate::types::IndexedMetadata;

const K1: f64 = 1.2;
const B: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub row_index: usize,
    pub base_score: f64,
    pub score: f64,
    pub tags_matched: Vec<String>,
}

pub struct Bm25Index {
    tag_boost: f64,
    doc_count: usize,
    avg_doc_len: f64,
    /// term -> number of documents containing it at least once.
    doc_freq: HashMap<String, usize>,
    /// per-row term -> frequency within that row's indexed text.
    doc_term_freq: Vec<HashMap<String, usize>>,
    doc_len: Vec<usize>,
    tags_lower: Vec<Vec<String>>,
}

impl Bm25Index {
    /// Build a fresh index over `metadata`. `tag_boost` comes from configuration
    /// (default 5.0, spec.md §6 "bm25.tag_boost").
    pub fn build(metadata: &[IndexedMetadata], tag_boost: f64) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut doc_term_freq = Vec::with_capacity(metadata.len());
        let mut doc_len = Vec::with_capacity(metadata.len());
        let mut tags_lower = Vec::with_capacity(metadata.len());

        for entry in metadata {
            let indexed_text = build_indexed_text(entry);
            let tokens = tokenize(&indexed_text);
            doc_len.push(tokens.len());

            let mut term_freq: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }

            doc_term_freq.push(term_freq);
            tags_lower.push(entry.tags_lower.clone());
        }

        let doc_count = metadata.len();
        let avg_doc_len = if doc_count == 0 {
            0.0
        } else {
            doc_len.iter().sum::<usize>() as f64 / doc_count as f64
        };

        Self { tag_boost, doc_count, avg_doc_len, doc_freq, doc_term_freq, doc_len, tags_lower }
    }

    fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        let n = self.doc_count as f64;
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln()
    }

    /// Score every document against `query`, apply the tag-boost promotion, and return
    /// the top `top_n` hits in descending score order.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<Bm25Hit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.doc_count == 0 {
            return Vec::new();
        }

        let idfs: HashMap<&str, f64> =
            query_terms.iter().map(|t| (t.as_str(), self.idf(t))).collect();

        let mut hits: Vec<Bm25Hit> = (0..self.doc_count)
            .filter_map(|row| {
                let base_score = self.score_one(row, &query_terms, &idfs);
                if base_score <= 0.0 {
                    return None;
                }

                let matched_tags: Vec<String> = query_terms
                    .iter()
                    .filter(|t| self.tags_lower[row].contains(t))
                    .cloned()
                    .collect();

                let score =
                    if matched_tags.is_empty() { base_score } else { base_score * self.tag_boost };

                Some(Bm25Hit { row_index: row, base_score, score, tags_matched: matched_tags })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_n);
        hits
    }

    fn score_one(&self, row: usize, query_terms: &[String], idfs: &HashMap<&str, f64>) -> f64 {
        let doc_len = self.doc_len[row] as f64;
        let term_freq = &self.doc_term_freq[row];

        query_terms
            .iter()
            .map(|term| {
                let tf = *term_freq.get(term).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let idf = *idfs.get(term.as_str()).unwrap_or(&0.0);
                let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_len.max(1.0));
                idf * (tf * (K1 + 1.0)) / denom
            })
            .sum()
    }
}

/// `title + " " + tags*2 + " " + description*2 + " " + content` — repetition inflates
/// term frequency for curated fields without requiring field-aware BM25 (spec.md §4.5).
fn build_indexed_text(entry: &IndexedMetadata) -> String {
    let tags = entry.tags_lower.join(" ");
    let description = entry.description().unwrap_or_default();
    format!(
        "{} {} {} {} {} {}",
        entry.title, tags, tags, description, description, entry.content
    )
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase().split_whitespace().map(|s| s.to_string()).collect()
}
