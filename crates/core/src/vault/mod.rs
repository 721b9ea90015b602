//! Vault Reader (spec.md §4.1): enumerates files under a vault root and produces
//! [`DocumentRecord`]s deterministically.

pub mod frontmatter;

use std::collections::HashSet;
use std::path::Path;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use rayon::prelude::*;

use crate::error::{Result, TemoaError};
use crate::types::DocumentRecord;

#[derive(Debug, Clone)]
pub struct VaultGlobs {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for VaultGlobs {
    fn default() -> Self {
        Self {
            include: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude: vec![".temoa/**".to_string(), ".git/**".to_string()],
        }
    }
}

/// A lightweight stat-only record used by the incremental indexer to diff vault state
/// against the file-tracking table without paying the embedding-prep cost.
#[derive(Debug, Clone)]
pub struct VaultFileStat {
    pub relative_path: String,
    pub mtime: i64,
    pub content_length: usize,
}

/// Enumerate `(relative_path, mtime, content_length)` for every surviving file, without
/// reading and parsing front matter. Used by [`crate::indexer::IncrementalIndexer`] to
/// compute the new/modified/deleted diff cheaply (spec.md §4.6 step 1).
pub fn stat_vault(vault_root: &Path, globs: &VaultGlobs) -> Result<Vec<VaultFileStat>> {
    let entries = walk_vault_paths(vault_root, globs)?;
    let mut seen_inodes = HashSet::new();
    let mut stats = Vec::new();

    for (relative_path, absolute_path) in entries {
        if !dedup_by_inode(&absolute_path, &mut seen_inodes) {
            continue;
        }
        let metadata = match std::fs::metadata(&absolute_path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime = mtime_seconds(&metadata);
        stats.push(VaultFileStat {
            relative_path,
            mtime,
            content_length: metadata.len() as usize,
        });
    }

    Ok(stats)
}

/// Read and parse every surviving file under `vault_root` into a [`DocumentRecord`].
/// Enumeration is case-sensitive at the path level but deduplicates paths that resolve to
/// the same inode, so case-insensitive filesystems don't double-emit (spec.md §4.1).
pub fn read_vault(vault_root: &Path, globs: &VaultGlobs) -> Result<Vec<DocumentRecord>> {
    if !vault_root.is_dir() {
        return Err(TemoaError::vault_read(vault_root, "vault root does not exist or is not a directory"));
    }

    let entries = walk_vault_paths(vault_root, globs)?;
    let mut seen_inodes = HashSet::new();
    let mut deduped = Vec::with_capacity(entries.len());
    for (relative_path, absolute_path) in entries {
        if dedup_by_inode(&absolute_path, &mut seen_inodes) {
            deduped.push((relative_path, absolute_path));
        }
    }

    let records: Vec<DocumentRecord> = deduped
        .into_par_iter()
        .filter_map(|(relative_path, absolute_path)| read_document(&relative_path, &absolute_path))
        .collect();

    Ok(records)
}

/// Read a single document by its relative path, for use by the incremental indexer when
/// re-chunking/re-embedding a modified file (it already knows which paths changed).
pub fn read_one(vault_root: &Path, relative_path: &str) -> Option<DocumentRecord> {
    let absolute_path = vault_root.join(relative_path);
    read_document(relative_path, &absolute_path)
}

fn read_document(relative_path: &str, absolute_path: &Path) -> Option<DocumentRecord> {
    let metadata = std::fs::metadata(absolute_path).ok()?;
    let bytes = std::fs::read(absolute_path).ok()?;
    // Surrogate and otherwise-unencodable byte sequences are sanitized to U+FFFD rather
    // than dropping the document (spec.md §7): `from_utf8_lossy` is the sanitizing step,
    // performed here at the core boundary rather than left to a transport layer.
    let raw = String::from_utf8_lossy(&bytes).into_owned();
    let (front_matter, mut body_text) = frontmatter::extract_front_matter(&raw, relative_path);

    // Descriptions get positional weight in embeddings by being prepended to the body.
    if let Some(description) = front_matter.get("description").and_then(|v| v.as_str()) {
        body_text = format!("{description}\n\n{body_text}");
    }

    let title = front_matter
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| filename_stem(relative_path));

    Some(DocumentRecord {
        relative_path: relative_path.to_string(),
        title,
        body_text,
        front_matter,
        mtime: mtime_seconds(&metadata),
    })
}

fn filename_stem(relative_path: &str) -> String {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name).to_string()
}

fn mtime_seconds(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Returns `false` (and records the inode) the first time it sees an inode, `false`
/// thereafter for every subsequent path resolving to the same file.
fn dedup_by_inode(path: &Path, seen: &mut HashSet<(u64, u64)>) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else { return true };
    match inode_key(&metadata) {
        Some(key) => seen.insert(key),
        None => true,
    }
}

#[cfg(unix)]
fn inode_key(metadata: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn inode_key(_metadata: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

fn walk_vault_paths(vault_root: &Path, globs: &VaultGlobs) -> Result<Vec<(String, std::path::PathBuf)>> {
    let include = build_globset(&globs.include)?;
    let exclude = build_globset(&globs.exclude)?;
    let include_is_empty = globs.include.is_empty();

    let mut results = Vec::new();
    let walker = WalkBuilder::new(vault_root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(move |entry| {
            entry.file_name().to_str() != Some(".temoa")
        })
        .build();

    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let absolute = entry.path();
        let Ok(relative) = absolute.strip_prefix(vault_root) else { continue };
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&relative_str) {
            continue;
        }
        if !include_is_empty && !include.is_match(&relative_str) {
            continue;
        }

        results.push((relative_str, absolute.to_path_buf()));
    }

    Ok(results)
}

fn build_globset(patterns: &[String]) -> Result<ignore::gitignore::Gitignore> {
    let mut builder = ignore::gitignore::GitignoreBuilder::new("/");
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| TemoaError::config(format!("invalid glob '{pattern}': {e}")))?;
    }
    builder.build().map_err(|e| TemoaError::config(e.to_string()))
}

trait GlobsetExt {
    fn is_match(&self, path: &str) -> bool;
}

impl GlobsetExt for ignore::gitignore::Gitignore {
    fn is_match(&self, path: &str) -> bool {
        self.matched(path, false).is_ignore()
    }
}
