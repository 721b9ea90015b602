//! Search profiles: named, frozen bundles of pipeline parameters.
//!
//! A profile supplies defaults for every knob the query pipeline consults; an explicit
//! per-request override always wins (see [`crate::pipeline::SearchRequest`]).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProfile {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub hybrid_enabled: bool,
    /// Semantic share of the hybrid blend, 0..1. Retained for profile bookkeeping; the
    /// fusion stage itself ranks via reciprocal rank fusion rather than a weighted sum.
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f64,
    #[serde(default = "default_bm25_boost")]
    pub bm25_boost: f64,
    #[serde(default)]
    pub rerank_enabled: bool,
    #[serde(default)]
    pub expand_query_enabled: bool,
    #[serde(default = "default_max_boost")]
    pub max_boost: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    pub max_age_days: Option<f64>,
    #[serde(default)]
    pub include_types: Vec<String>,
    #[serde(default = "default_exclude_types")]
    pub exclude_types: Vec<String>,
    #[serde(default = "default_true")]
    pub chunking_enabled: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_results_per_file")]
    pub max_results_per_file: usize,
    #[serde(default)]
    pub show_chunk_context: bool,
    #[serde(default)]
    pub metadata_boost: bool,
}

fn default_true() -> bool {
    true
}
fn default_hybrid_weight() -> f64 {
    0.5
}
fn default_bm25_boost() -> f64 {
    5.0
}
fn default_max_boost() -> f64 {
    0.2
}
fn default_half_life_days() -> f64 {
    90.0
}
fn default_exclude_types() -> Vec<String> {
    vec!["daily".to_string()]
}
fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    400
}
fn default_max_results_per_file() -> usize {
    1
}

pub const BUILTIN_PROFILE_NAMES: &[&str] = &["default", "repos", "recent", "deep", "keywords"];

impl SearchProfile {
    pub fn is_builtin_name(name: &str) -> bool {
        BUILTIN_PROFILE_NAMES.contains(&name)
    }

    pub fn default_profile() -> Self {
        Self {
            display_name: "Default".to_string(),
            description: "Balanced hybrid search with reranking off.".to_string(),
            hybrid_enabled: true,
            hybrid_weight: 0.5,
            bm25_boost: 5.0,
            rerank_enabled: false,
            expand_query_enabled: false,
            max_boost: 0.2,
            half_life_days: 90.0,
            max_age_days: None,
            include_types: Vec::new(),
            exclude_types: vec!["daily".to_string()],
            chunking_enabled: true,
            chunk_size: 2000,
            chunk_overlap: 400,
            max_results_per_file: 1,
            show_chunk_context: false,
            metadata_boost: false,
        }
    }

    pub fn repos() -> Self {
        Self {
            display_name: "Repos".to_string(),
            description: "Keyword-heavy, metadata-boosted, reranker off.".to_string(),
            hybrid_enabled: true,
            hybrid_weight: 0.3,
            bm25_boost: 6.0,
            rerank_enabled: false,
            metadata_boost: true,
            ..Self::default_profile()
        }
    }

    pub fn recent() -> Self {
        Self {
            display_name: "Recent".to_string(),
            description: "Aggressive time decay with a hard age cutoff.".to_string(),
            max_boost: 0.6,
            half_life_days: 21.0,
            max_age_days: Some(180.0),
            ..Self::default_profile()
        }
    }

    pub fn deep() -> Self {
        Self {
            display_name: "Deep".to_string(),
            description: "Semantic-heavy with chunking and preserved context.".to_string(),
            hybrid_weight: 0.8,
            rerank_enabled: true,
            show_chunk_context: true,
            max_results_per_file: 3,
            ..Self::default_profile()
        }
    }

    pub fn keywords() -> Self {
        Self {
            display_name: "Keywords".to_string(),
            description: "BM25-heavy retrieval with reranking off.".to_string(),
            hybrid_weight: 0.15,
            bm25_boost: 8.0,
            rerank_enabled: false,
            ..Self::default_profile()
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default_profile()),
            "repos" => Some(Self::repos()),
            "recent" => Some(Self::recent()),
            "deep" => Some(Self::deep()),
            "keywords" => Some(Self::keywords()),
            _ => None,
        }
    }
}
