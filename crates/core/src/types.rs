//! Shared data-model types: document records, chunks, indexed metadata, and search
//! results. Row `i` in the embedding matrix owned by [`crate::store::EmbeddingStore`]
//! always corresponds to `metadata[i]`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A scalar or list value parsed out of YAML front matter. Tags and `type` may appear as
/// either a bare string or a list of strings in source documents; this enum keeps both
/// representations without forcing an early, lossy coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrontMatterValue {
    String(String),
    List(Vec<String>),
}

impl FrontMatterValue {
    /// Flatten to a list of strings regardless of source shape.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::String(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::List(items) => items.first().map(|s| s.as_str()),
        }
    }
}

pub type FrontMatter = BTreeMap<String, FrontMatterValue>;

/// One file read out of a vault, with front matter parsed and stripped from the body.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Stable identifier inside the vault, forward-slash separated.
    pub relative_path: String,
    /// From front matter `title` when present, else the filename stem.
    pub title: String,
    /// Content with front matter removed (and `description` prepended, see vault::reader).
    pub body_text: String,
    pub front_matter: FrontMatter,
    /// Integer seconds, used for change detection and the Stage 6 time boost.
    pub mtime: i64,
}

impl DocumentRecord {
    pub fn tags_lower(&self) -> Vec<String> {
        self.front_matter
            .get("tags")
            .map(|v| v.as_list().into_iter().map(|t| t.to_lowercase()).collect())
            .unwrap_or_default()
    }

    pub fn description(&self) -> Option<String> {
        self.front_matter.get("description").and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    pub fn gleaning_id(&self) -> Option<String> {
        self.front_matter.get("gleaning_id").and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    /// Resolved type set per spec.md §4.7 Stage 4: explicit `type` front matter, else
    /// `"gleaning"` when a `gleaning_id` is present, else `"none"`.
    pub fn types(&self) -> Vec<String> {
        if let Some(v) = self.front_matter.get("type") {
            return v.as_list().into_iter().map(|t| t.to_lowercase()).collect();
        }
        if self.gleaning_id().is_some() {
            return vec!["gleaning".to_string()];
        }
        vec!["none".to_string()]
    }
}

/// A contiguous substring of a document's body, indexed independently.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub file_path: String,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content: String,
    pub is_chunked_file: bool,
}

/// One row of the parallel metadata list, aligned 1:1 with a row of the embedding matrix.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct IndexedMetadata {
    pub file_path: String,
    pub title: String,
    /// Snippet of chunk/document content used both for BM25 indexing and result display.
    pub content: String,
    #[bincode(with_serde)]
    pub front_matter: FrontMatter,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub is_chunked_file: bool,
    pub tags_lower: Vec<String>,
    pub mtime: i64,
}

impl IndexedMetadata {
    pub fn description(&self) -> Option<String> {
        self.front_matter.get("description").and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    pub fn gleaning_id(&self) -> Option<String> {
        self.front_matter.get("gleaning_id").and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    pub fn types(&self) -> Vec<String> {
        if let Some(v) = self.front_matter.get("type") {
            return v.as_list().into_iter().map(|t| t.to_lowercase()).collect();
        }
        if self.gleaning_id().is_some() {
            return vec!["gleaning".to_string()];
        }
        vec!["none".to_string()]
    }
}

/// One record in a ranked search response, carrying every intermediate score used during
/// ranking for transparency (spec.md §3 "Search result").
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResult {
    pub relative_path: String,
    pub title: String,
    pub snippet: String,
    pub similarity_score: Option<f32>,
    pub bm25_score: Option<f64>,
    pub rrf_score: Option<f64>,
    pub cross_encoder_score: Option<f32>,
    pub time_boost_factor: Option<f64>,
    pub boosted_score: Option<f64>,
    pub final_score: f64,
    pub tags_matched: Vec<String>,
    pub tag_boosted: bool,
    pub is_chunked_file: bool,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub matched_chunks: usize,
    /// Every intermediate score keyed by name, duplicating the typed fields above for
    /// callers that want to render an opaque provenance table.
    pub score_breakdown: BTreeMap<String, f64>,
    /// Absolute row index into the owning engine's embedding matrix at the time this
    /// result was produced; internal bookkeeping, not part of the public contract.
    #[serde(skip)]
    pub row_index: usize,
}

/// Vault metadata sidecar stored alongside the embedding matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub vault_path: PathBuf,
    pub model_name: String,
    pub embedding_dimension: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// One entry of the file-tracking table: `relative_path -> {mtime, content_length, rows}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileTrackingEntry {
    pub mtime: i64,
    pub content_length: usize,
    pub positions: Vec<usize>,
}

pub type FileTracking = BTreeMap<String, FileTrackingEntry>;

/// `index.json`: vault metadata, file-tracking table, and row counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub vault_metadata: VaultMetadata,
    pub file_tracking: FileTracking,
    pub row_count: usize,
}

/// One entry of the gleaning status sidecar (`gleaning_status.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GleaningStatus {
    Active,
    Inactive,
    Hidden,
}

impl Default for GleaningStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GleaningStatusEntry {
    pub status: GleaningStatus,
    #[serde(default)]
    pub reason: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub history: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Path validation
// ---------------------------------------------------------------------------

/// Validate and canonicalize a path that is expected to live under `root`, rejecting
/// traversal attempts and symlink escapes. Used by Stage 6's mtime path guard (spec.md
/// §4.7) and by the Vault Reader's inode-dedup pass.
pub fn validate_under_root(root: &Path, rel_path: &str) -> Result<PathBuf, &'static str> {
    if rel_path.is_empty() || rel_path.contains("..") || rel_path.starts_with('/') {
        return Err("invalid path");
    }
    let full = root.join(rel_path);
    let canonical = full.canonicalize().map_err(|_| "file not found")?;
    let root_canonical = root.canonicalize().map_err(|_| "root not found")?;
    if !canonical.starts_with(&root_canonical) {
        return Err("path escapes vault root");
    }
    Ok(canonical)
}
