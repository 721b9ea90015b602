//! Embedding Store (spec.md §4.4): persists an aligned triple — embedding matrix,
//! parallel metadata list, and file-tracking table — to a vault-local directory keyed by
//! model name. Exclusively owns all three in memory; the Incremental Indexer is the only
//! collaborator allowed to call the mutating operations (spec.md §3 "Ownership").

use std::path::{Path, PathBuf};

use bincode::config::standard;

use crate::error::{Result, TemoaError};
use crate::types::{FileTracking, FileTrackingEntry, IndexManifest, IndexedMetadata, VaultMetadata};

const EMBEDDINGS_FILE: &str = "embeddings.bin";
const METADATA_FILE: &str = "metadata.bin";
const MANIFEST_FILE: &str = "index.json";

pub struct EmbeddingStore {
    dir: PathBuf,
    pub vault_path: PathBuf,
    pub model_name: String,
    pub dim: usize,
    /// Row-major, flat: row `i` occupies `matrix[i*dim .. (i+1)*dim]`.
    pub matrix: Vec<f32>,
    pub metadata: Vec<IndexedMetadata>,
    pub file_tracking: FileTracking,
    pub vault_metadata: Option<VaultMetadata>,
}

impl EmbeddingStore {
    pub fn dir_for(vault_root: &Path, model_name: &str) -> PathBuf {
        vault_root.join(".temoa").join(model_name)
    }

    fn empty(vault_path: PathBuf, model_name: String, dim: usize) -> Self {
        let dir = Self::dir_for(&vault_path, &model_name);
        Self {
            dir,
            vault_path,
            model_name,
            dim,
            matrix: Vec::new(),
            metadata: Vec::new(),
            file_tracking: FileTracking::new(),
            vault_metadata: None,
        }
    }

    pub fn rows(&self) -> usize {
        self.metadata.len()
    }

    /// Load the on-disk store for `vault_root`/`model_name`. Returns `Ok(None)` (the "no
    /// index" sentinel) if no index exists yet at all. Fails closed with `VaultMismatch`
    /// if the sidecar's recorded vault path disagrees with `vault_root`, unless `force` is
    /// set. If the matrix and metadata files are present but `index.json` itself is
    /// missing, this is a one-shot migration rather than "no index": the sidecar is
    /// rebuilt from the caller-provided vault path and `file_tracking` is recomputed from
    /// the existing metadata (spec.md §4.9, §6 "Missing fields trigger a one-shot
    /// migration").
    pub fn load(vault_root: &Path, model_name: &str, dim: usize, force: bool) -> Result<Option<Self>> {
        let dir = Self::dir_for(vault_root, model_name);
        let manifest_path = dir.join(MANIFEST_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        let embeddings_path = dir.join(EMBEDDINGS_FILE);

        if !manifest_path.exists() {
            if !metadata_path.exists() || !embeddings_path.exists() {
                return Ok(None);
            }
            return Self::migrate_missing_sidecar(vault_root, model_name, dim, dir, metadata_path, embeddings_path)
                .map(Some);
        }

        let manifest_raw = std::fs::read_to_string(&manifest_path)?;
        let manifest: IndexManifest = serde_json::from_str(&manifest_raw)
            .map_err(|e| TemoaError::index(format!("malformed index.json: {e}")))?;

        let resolved_root = vault_root
            .canonicalize()
            .map_err(|e| TemoaError::vault_read(vault_root, e.to_string()))?;
        if !force && manifest.vault_metadata.vault_path != resolved_root {
            return Err(TemoaError::vault_mismatch(manifest.vault_metadata.vault_path.clone(), resolved_root));
        }

        let metadata: Vec<IndexedMetadata> = read_metadata(&metadata_path)?;
        let matrix: Vec<f32> = read_matrix(&embeddings_path)?;

        if metadata.len() * manifest.vault_metadata.embedding_dimension != matrix.len() {
            return Err(TemoaError::index(
                "matrix row count does not match metadata length after load",
            ));
        }

        Ok(Some(Self {
            dir,
            vault_path: resolved_root,
            model_name: model_name.to_string(),
            dim: manifest.vault_metadata.embedding_dimension,
            matrix,
            metadata,
            file_tracking: manifest.file_tracking,
            vault_metadata: Some(manifest.vault_metadata),
        }))
    }

    /// One-shot migration path: the matrix and metadata survived but `index.json` did
    /// not (e.g. an older on-disk layout, or a crash that dropped only the sidecar). A
    /// fresh sidecar is written immediately from the caller-provided vault path so the
    /// mismatch guard has something authoritative to compare against on every subsequent
    /// load.
    fn migrate_missing_sidecar(
        vault_root: &Path,
        model_name: &str,
        dim: usize,
        dir: PathBuf,
        metadata_path: PathBuf,
        embeddings_path: PathBuf,
    ) -> Result<Self> {
        let resolved_root = vault_root
            .canonicalize()
            .map_err(|e| TemoaError::vault_read(vault_root, e.to_string()))?;

        let metadata: Vec<IndexedMetadata> = read_metadata(&metadata_path)?;
        let matrix: Vec<f32> = read_matrix(&embeddings_path)?;
        if metadata.len() * dim != matrix.len() {
            return Err(TemoaError::index(
                "matrix row count does not match metadata length during sidecar migration",
            ));
        }

        let mut store = Self {
            dir,
            vault_path: resolved_root,
            model_name: model_name.to_string(),
            dim,
            matrix,
            metadata,
            file_tracking: FileTracking::new(),
            vault_metadata: None,
        };
        store.save()?;
        tracing::warn!(
            vault = %store.vault_path.display(),
            model = model_name,
            "migrated index missing index.json sidecar; wrote a fresh one from the caller-provided vault path"
        );
        Ok(store)
    }

    /// Construct an empty store ready for a full rebuild (no on-disk state yet, or
    /// `force=true` discarding whatever the caller already loaded).
    pub fn new_empty(vault_root: &Path, model_name: &str, dim: usize) -> Result<Self> {
        let resolved_root = vault_root
            .canonicalize()
            .map_err(|e| TemoaError::vault_read(vault_root, e.to_string()))?;
        Ok(Self::empty(resolved_root, model_name.to_string(), dim))
    }

    /// Append new rows at the tail. In-memory only; persisted on the next `save()`.
    pub fn append(&mut self, vectors: Vec<Vec<f32>>, metas: Vec<IndexedMetadata>) {
        debug_assert_eq!(vectors.len(), metas.len());
        for (vector, meta) in vectors.into_iter().zip(metas) {
            debug_assert_eq!(vector.len(), self.dim);
            self.matrix.extend_from_slice(&vector);
            self.metadata.push(meta);
        }
    }

    /// Replace a single row in place.
    pub fn update(&mut self, row_index: usize, vector: Vec<f32>, meta: IndexedMetadata) {
        debug_assert_eq!(vector.len(), self.dim);
        let start = row_index * self.dim;
        self.matrix[start..start + self.dim].copy_from_slice(&vector);
        self.metadata[row_index] = meta;
    }

    /// Remove rows by index. Callers must pass indices in descending order (spec.md §4.6
    /// step 4) so earlier indices remain valid while later ones are excised.
    pub fn delete(&mut self, row_indices_descending: &[usize]) {
        for &row in row_indices_descending {
            let start = row * self.dim;
            self.matrix.drain(start..start + self.dim);
            self.metadata.remove(row);
        }
    }

    /// Rebuild `file_tracking` from the authoritative metadata list — row positions are
    /// canonical (spec.md §4.4, §9 "Row-index discipline").
    pub fn rebuild_file_tracking(&mut self) {
        let mut tracking = FileTracking::new();
        for (row, meta) in self.metadata.iter().enumerate() {
            let entry = tracking.entry(meta.file_path.clone()).or_insert_with(|| FileTrackingEntry {
                mtime: meta.mtime,
                content_length: meta.content.len(),
                positions: Vec::new(),
            });
            entry.mtime = meta.mtime;
            entry.positions.push(row);
        }
        self.file_tracking = tracking;
    }

    /// Atomically persist `(matrix, metadata, vault_metadata)` — write-to-temp, fsync,
    /// rename for each of the three files, in an order that never leaves a partially
    /// written index visible on a crash mid-save (spec.md §4.4 invariants).
    pub fn save(&mut self) -> Result<()> {
        self.rebuild_file_tracking();

        let now = chrono::Utc::now();
        let vault_metadata = VaultMetadata {
            vault_path: self.vault_path.clone(),
            model_name: self.model_name.clone(),
            embedding_dimension: self.dim,
            created_at: self.vault_metadata.as_ref().map(|v| v.created_at).unwrap_or(now),
            updated_at: now,
        };

        std::fs::create_dir_all(&self.dir)?;

        let manifest = IndexManifest {
            vault_metadata: vault_metadata.clone(),
            file_tracking: self.file_tracking.clone(),
            row_count: self.rows(),
        };
        let manifest_json = serde_json::to_string_pretty(&manifest)?;

        write_metadata(&self.dir.join(METADATA_FILE), &self.metadata)?;
        write_matrix(&self.dir.join(EMBEDDINGS_FILE), &self.matrix)?;
        atomic_write(&self.dir.join(MANIFEST_FILE), manifest_json.as_bytes())?;

        self.vault_metadata = Some(vault_metadata);
        Ok(())
    }
}

fn write_metadata(path: &Path, value: &[IndexedMetadata]) -> Result<()> {
    let bytes = bincode::encode_to_vec(value, standard())
        .map_err(|e| TemoaError::index(format!("bincode encode failed: {e}")))?;
    atomic_write(path, &bytes)
}

fn read_metadata(path: &Path) -> Result<Vec<IndexedMetadata>> {
    let bytes = std::fs::read(path)?;
    let (value, _): (Vec<IndexedMetadata>, usize) = bincode::decode_from_slice(&bytes, standard())
        .map_err(|e| TemoaError::index(format!("bincode decode failed for {}: {e}", path.display())))?;
    Ok(value)
}

fn write_matrix(path: &Path, value: &[f32]) -> Result<()> {
    let bytes = bincode::encode_to_vec(value, standard())
        .map_err(|e| TemoaError::index(format!("bincode encode failed: {e}")))?;
    atomic_write(path, &bytes)
}

fn read_matrix(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    let (value, _): (Vec<f32>, usize) = bincode::decode_from_slice(&bytes, standard())
        .map_err(|e| TemoaError::index(format!("bincode decode failed for {}: {e}", path.display())))?;
    Ok(value)
}

/// Write-to-temp, fsync, rename. The rename is atomic on the same filesystem, so a crash
/// between the temp write and the rename leaves the previous file (or no file) intact —
/// never a half-written target.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
    ));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        std::io::Write::write_all(&mut file, bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrontMatter;

    fn meta(path: &str, mtime: i64) -> IndexedMetadata {
        IndexedMetadata {
            file_path: path.to_string(),
            title: path.to_string(),
            content: "content".to_string(),
            front_matter: FrontMatter::new(),
            chunk_index: 0,
            chunk_total: 1,
            is_chunked_file: false,
            tags_lower: Vec::new(),
            mtime,
        }
    }

    #[test]
    fn save_then_load_round_trips_matrix_and_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = EmbeddingStore::new_empty(dir.path(), "test-model", 2).unwrap();
        store.append(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta("a.md", 1), meta("b.md", 2)]);
        store.save().unwrap();

        let loaded = EmbeddingStore::load(dir.path(), "test-model", 2, false).unwrap().unwrap();
        assert_eq!(loaded.rows(), 2);
        assert_eq!(loaded.matrix, vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(loaded.file_tracking.len(), 2);
    }

    #[test]
    fn load_with_no_index_returns_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = EmbeddingStore::load(dir.path(), "test-model", 2, false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn load_rejects_vault_path_mismatch_unless_forced() {
        let dir_a = tempfile::TempDir::new().unwrap();
        let dir_b = tempfile::TempDir::new().unwrap();

        let mut store = EmbeddingStore::new_empty(dir_a.path(), "test-model", 2).unwrap();
        store.append(vec![vec![1.0, 0.0]], vec![meta("a.md", 1)]);
        store.save().unwrap();

        // Move the saved index directory under dir_b to simulate a vault-path mismatch.
        let from = EmbeddingStore::dir_for(dir_a.path(), "test-model");
        let to = EmbeddingStore::dir_for(dir_b.path(), "test-model");
        std::fs::create_dir_all(to.parent().unwrap()).unwrap();
        std::fs::rename(&from, &to).unwrap();

        let mismatch = EmbeddingStore::load(dir_b.path(), "test-model", 2, false);
        assert!(matches!(mismatch, Err(TemoaError::VaultMismatch { .. })));

        let forced = EmbeddingStore::load(dir_b.path(), "test-model", 2, true).unwrap();
        assert!(forced.is_some());
    }

    #[test]
    fn load_migrates_a_missing_sidecar_from_surviving_matrix_and_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = EmbeddingStore::new_empty(dir.path(), "test-model", 2).unwrap();
        store.append(vec![vec![1.0, 0.0]], vec![meta("a.md", 1)]);
        store.save().unwrap();

        std::fs::remove_file(EmbeddingStore::dir_for(dir.path(), "test-model").join("index.json")).unwrap();

        let migrated = EmbeddingStore::load(dir.path(), "test-model", 2, false).unwrap().unwrap();
        assert_eq!(migrated.rows(), 1);
        assert_eq!(migrated.file_tracking["a.md"].positions, vec![0]);
        assert!(EmbeddingStore::dir_for(dir.path(), "test-model").join("index.json").exists());
    }

    #[test]
    fn rebuild_file_tracking_positions_match_metadata_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = EmbeddingStore::new_empty(dir.path(), "test-model", 1).unwrap();
        store.append(
            vec![vec![1.0], vec![2.0], vec![3.0]],
            vec![meta("a.md", 1), meta("a.md", 1), meta("b.md", 2)],
        );
        store.rebuild_file_tracking();
        assert_eq!(store.file_tracking["a.md"].positions, vec![0, 1]);
        assert_eq!(store.file_tracking["b.md"].positions, vec![2]);
    }

    #[test]
    fn delete_in_descending_order_keeps_remaining_rows_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = EmbeddingStore::new_empty(dir.path(), "test-model", 1).unwrap();
        store.append(
            vec![vec![1.0], vec![2.0], vec![3.0]],
            vec![meta("a.md", 1), meta("b.md", 1), meta("c.md", 1)],
        );
        store.delete(&[2, 0]);
        assert_eq!(store.matrix, vec![2.0]);
        assert_eq!(store.metadata[0].file_path, "b.md");
    }
}
