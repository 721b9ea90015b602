//! Incremental Indexer (spec.md §4.6): diffs vault state against the file-tracking table,
//! re-embeds only what changed, and persists the result atomically. A failure at any point
//! before `store.save()` leaves the on-disk index untouched — the store's in-memory
//! mutations are never partially flushed (spec.md §4.6 "Failure semantics").

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::chunk::{self, ChunkParams};
use crate::embedding::BiEncoder;
use crate::error::Result;
use crate::store::EmbeddingStore;
use crate::types::IndexedMetadata;
use crate::vault::{self, VaultGlobs};

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub rows_removed: usize,
    pub rows_added: usize,
    pub total_rows: usize,
}

/// Reindex `vault_root` against whatever index already exists for `model_name`,
/// creating a fresh one if none does. `force` serves two purposes (spec.md §4.6 step 2,
/// §8 idempotence): it bypasses the vault-path mismatch guard when loading, and it
/// discards whatever was loaded so every vault file classifies as "new" — a full
/// rebuild, equivalent to clearing the store first and reindexing with `force=false`.
pub fn reindex(
    vault_root: &Path,
    globs: &VaultGlobs,
    model_name: &str,
    bi_encoder: &BiEncoder,
    chunk_params: ChunkParams,
    force: bool,
) -> Result<(EmbeddingStore, IndexStats)> {
    let dim = bi_encoder.dimension();
    // `force` is passed through to `load` so a vault-path mismatch against an existing
    // on-disk index still surfaces as an error unless explicitly bypassed; the loaded
    // rows themselves are then discarded below when `force` is set, since a forced run is
    // a full rebuild rather than an incremental diff.
    let loaded = EmbeddingStore::load(vault_root, model_name, dim, force)?;
    let mut store = if force {
        EmbeddingStore::new_empty(vault_root, model_name, dim)?
    } else {
        match loaded {
            Some(store) => store,
            None => EmbeddingStore::new_empty(vault_root, model_name, dim)?,
        }
    };

    let stats = vault::stat_vault(vault_root, globs)?;
    let current: BTreeMap<&str, &vault::VaultFileStat> =
        stats.iter().map(|s| (s.relative_path.as_str(), s)).collect();

    let (new_paths, modified_paths, deleted_paths) = diff_vault(&stats, &store.file_tracking);

    // Step 4 (spec.md §4.6): DELETE rows for both deleted and modified files, in
    // descending order, so earlier indices stay valid while later ones are excised.
    let mut rows_to_delete: Vec<usize> = deleted_paths
        .iter()
        .chain(modified_paths.iter())
        .filter_map(|path| store.file_tracking.get(path))
        .flat_map(|entry| entry.positions.iter().copied())
        .collect();
    rows_to_delete.sort_unstable();
    rows_to_delete.dedup();
    rows_to_delete.reverse();
    let rows_removed = rows_to_delete.len();
    store.delete(&rows_to_delete);

    // Step 5/6: APPEND fresh rows for both modified and newly discovered files.
    let mut to_embed: Vec<String> = Vec::new();
    let mut to_embed_meta: Vec<IndexedMetadata> = Vec::new();

    for path in modified_paths.iter().chain(new_paths.iter()) {
        let Some(doc) = vault::read_one(vault_root, path) else { continue };
        let chunks = chunk::chunk_document(&doc, chunk_params);
        let tags_lower = doc.tags_lower();
        for c in chunks {
            to_embed.push(c.content.clone());
            to_embed_meta.push(IndexedMetadata {
                file_path: doc.relative_path.clone(),
                title: doc.title.clone(),
                content: c.content,
                front_matter: doc.front_matter.clone(),
                chunk_index: c.chunk_index,
                chunk_total: c.chunk_total,
                is_chunked_file: c.is_chunked_file,
                tags_lower: tags_lower.clone(),
                mtime: current.get(path.as_str()).map(|s| s.mtime).unwrap_or(doc.mtime),
            });
        }
    }

    let rows_added = to_embed_meta.len();
    if !to_embed.is_empty() {
        let vectors = bi_encoder.encode(&to_embed, crate::embedding::model::DEFAULT_BATCH_SIZE)?;
        store.append(vectors, to_embed_meta);
    }

    store.save()?;

    let result_stats = IndexStats {
        files_added: new_paths.len(),
        files_modified: modified_paths.len(),
        files_deleted: deleted_paths.len(),
        rows_removed,
        rows_added,
        total_rows: store.rows(),
    };

    Ok((store, result_stats))
}

/// Classify every currently-present file as new, modified (mtime or length changed), or
/// untouched, and every previously-tracked file no longer present as deleted.
fn diff_vault(
    stats: &[vault::VaultFileStat],
    tracking: &crate::types::FileTracking,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut new_paths = Vec::new();
    let mut modified_paths = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for stat in stats {
        seen.insert(stat.relative_path.as_str());
        match tracking.get(&stat.relative_path) {
            None => new_paths.push(stat.relative_path.clone()),
            Some(entry) => {
                if entry.mtime != stat.mtime || entry.content_length != stat.content_length {
                    modified_paths.push(stat.relative_path.clone());
                }
            }
        }
    }

    let deleted_paths: Vec<String> =
        tracking.keys().filter(|path| !seen.contains(path.as_str())).cloned().collect();

    (new_paths, modified_paths, deleted_paths)
}
