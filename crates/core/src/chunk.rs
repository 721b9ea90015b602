//! Document chunker: splits a document body into one or more overlapping windows
//! (spec.md §4.2). Chunking is an indexing-time decision, not a query-time one — a
//! profile's `chunk_size`/`chunk_overlap` only take effect the next time a vault is
//! (re)indexed with that profile's chunking parameters.

use crate::types::{Chunk, DocumentRecord};

/// Below this length, a document gets a single chunk covering the whole body.
pub const DEFAULT_THRESHOLD: usize = 4_000;
pub const DEFAULT_CHUNK_SIZE: usize = 2_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 400;

#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub threshold: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split `doc.body_text` into one or more chunks per the sliding-window rule set.
///
/// Invariants preserved (spec.md §8 invariant 2): chunk indices are consecutive from 0,
/// `chunk_total` equals the emitted count, every offset satisfies
/// `0 <= start < end <= len(body_text)`, and the chunks cover the full body with overlaps
/// bounded by `chunk_overlap` except for the final, possibly-merged chunk.
pub fn chunk_document(doc: &DocumentRecord, params: ChunkParams) -> Vec<Chunk> {
    let body = &doc.body_text;
    let len = body.len();

    if len == 0 {
        return vec![Chunk {
            file_path: doc.relative_path.clone(),
            chunk_index: 0,
            chunk_total: 1,
            start_offset: 0,
            end_offset: 0,
            content: String::new(),
            is_chunked_file: false,
        }];
    }

    if len < params.threshold {
        return vec![Chunk {
            file_path: doc.relative_path.clone(),
            chunk_index: 0,
            chunk_total: 1,
            start_offset: 0,
            end_offset: len,
            content: body.clone(),
            is_chunked_file: false,
        }];
    }

    let stride = params.chunk_size.saturating_sub(params.chunk_overlap).max(1);
    let mut windows: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + params.chunk_size).min(len);
        windows.push((start, end));
        if end >= len {
            break;
        }
        let next_start = start + stride;
        if next_start >= len {
            break;
        }
        start = next_start;
    }

    // Small-tail merge: fold a too-short final window into its predecessor.
    let min_tail = params.chunk_size / 2;
    if windows.len() > 1 {
        let (last_start, last_end) = *windows.last().unwrap();
        if last_end - last_start < min_tail {
            windows.pop();
            let prev = windows.last_mut().unwrap();
            prev.1 = last_end;
        }
    }

    let total = windows.len();
    windows
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| Chunk {
            file_path: doc.relative_path.clone(),
            chunk_index: i,
            chunk_total: total,
            start_offset: start,
            end_offset: end,
            content: byte_slice(body, start, end),
            is_chunked_file: total > 1,
        })
        .collect()
}

/// Slice on char boundaries nearest the requested byte offsets, since sliding windows are
/// computed over byte length but Rust string indexing requires UTF-8 boundaries.
fn byte_slice(s: &str, start: usize, end: usize) -> String {
    let start = nearest_char_boundary(s, start);
    let end = nearest_char_boundary(s, end);
    s[start..end].to_string()
}

fn nearest_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc_with_body(body: &str) -> DocumentRecord {
        DocumentRecord {
            relative_path: "note.md".to_string(),
            title: "note".to_string(),
            body_text: body.to_string(),
            front_matter: BTreeMap::new(),
            mtime: 0,
        }
    }

    #[test]
    fn short_document_gets_single_chunk() {
        let doc = doc_with_body(&"x".repeat(100));
        let chunks = chunk_document(&doc, ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_total, 1);
        assert!(!chunks[0].is_chunked_file);
    }

    #[test]
    fn boundary_length_just_under_threshold_is_one_chunk() {
        let doc = doc_with_body(&"x".repeat(DEFAULT_THRESHOLD - 1));
        let chunks = chunk_document(&doc, ChunkParams::default());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn boundary_length_at_threshold_is_more_than_one_chunk() {
        let doc = doc_with_body(&"x".repeat(DEFAULT_THRESHOLD + 500));
        let chunks = chunk_document(&doc, ChunkParams::default());
        assert!(chunks.len() > 1);
    }

    #[test]
    fn chunk_indices_are_consecutive_and_total_matches_count() {
        let doc = doc_with_body(&"word ".repeat(2000));
        let chunks = chunk_document(&doc, ChunkParams::default());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.chunk_total, chunks.len());
        }
    }

    #[test]
    fn chunks_cover_the_full_body() {
        let doc = doc_with_body(&"word ".repeat(2000));
        let chunks = chunk_document(&doc, ChunkParams::default());
        assert_eq!(chunks.first().unwrap().start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, doc.body_text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset, "consecutive chunks must overlap");
        }
    }

    #[test]
    fn offsets_are_always_valid() {
        let doc = doc_with_body(&"word ".repeat(3000));
        let chunks = chunk_document(&doc, ChunkParams::default());
        for c in &chunks {
            assert!(c.start_offset < c.end_offset);
            assert!(c.end_offset <= doc.body_text.len());
        }
    }

    #[test]
    fn small_tail_is_merged_into_previous_chunk() {
        // chunk_size=100, overlap=20 => stride 80. Body length chosen so the final
        // window would be under chunk_size/2 and must be folded into its predecessor.
        let params = ChunkParams { threshold: 150, chunk_size: 100, chunk_overlap: 20 };
        let doc = doc_with_body(&"x".repeat(210));
        let chunks = chunk_document(&doc, params);
        assert_eq!(chunks.last().unwrap().end_offset, 210);
        // No chunk should be shorter than chunk_size/2 except none at all after merge.
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.end_offset - c.start_offset >= params.chunk_size / 2);
        }
    }

    #[test]
    fn empty_body_yields_single_empty_chunk() {
        let doc = doc_with_body("");
        let chunks = chunk_document(&doc, ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "");
    }
}
