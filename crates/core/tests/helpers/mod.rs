//! End-to-end test harness: builds a tiny on-disk vault, indexes it with the real
//! bi-encoder, and hands back a loaded [`SearchEngine`]-shaped context to drive through
//! `pipeline::run`. Mirrors the shape of the teacher's `TestHarness`, minus the
//! git-fixture plumbing this crate has no use for.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tempfile::TempDir;
use temoa_core::chunk::ChunkParams;
use temoa_core::embedding::{BiEncoder, CrossEncoder};
use temoa_core::error::Result;
use temoa_core::indexer;
use temoa_core::vault::VaultGlobs;

pub const TEST_MODEL: &str = "bge-small-en-v1.5";
pub const TEST_RERANKER: &str = "bge-reranker-base";

/// Models are slow to load (network download on first run); share one instance across
/// every test in the binary rather than reloading per-test.
fn shared_bi_encoder() -> &'static Arc<BiEncoder> {
    static CELL: OnceLock<Arc<BiEncoder>> = OnceLock::new();
    CELL.get_or_init(|| Arc::new(BiEncoder::load(TEST_MODEL).expect("failed to load test bi-encoder")))
}

fn shared_cross_encoder() -> &'static Arc<CrossEncoder> {
    static CELL: OnceLock<Arc<CrossEncoder>> = OnceLock::new();
    CELL.get_or_init(|| Arc::new(CrossEncoder::load(TEST_RERANKER).expect("failed to load test cross-encoder")))
}

pub struct TestVault {
    pub dir: TempDir,
}

impl TestVault {
    pub fn new() -> Self {
        Self { dir: TempDir::new().expect("failed to create temp vault dir") }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write one note at `relative_path`, creating parent directories as needed.
    pub fn write(&self, relative_path: &str, contents: &str) -> &Self {
        let full = self.dir.path().join(relative_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full, contents).unwrap();
        self
    }

    /// Backdate a note's mtime by `days_ago` days, for Stage 6 time-boost scenarios.
    pub fn set_mtime_days_ago(&self, relative_path: &str, days_ago: u64) {
        let full = self.dir.path().join(relative_path);
        let target = std::time::SystemTime::now() - std::time::Duration::from_secs(days_ago * 86_400);
        let file = std::fs::File::open(&full).unwrap();
        file.set_modified(target).unwrap();
    }

    /// Run a full reindex against the shared test bi-encoder and return the resulting
    /// store + stats.
    pub fn reindex(&self) -> Result<(temoa_core::store::EmbeddingStore, indexer::IndexStats)> {
        indexer::reindex(
            self.root(),
            &VaultGlobs::default(),
            TEST_MODEL,
            shared_bi_encoder().as_ref(),
            ChunkParams::default(),
            false,
        )
    }

    pub fn bi_encoder(&self) -> &'static Arc<BiEncoder> {
        shared_bi_encoder()
    }

    pub fn cross_encoder(&self) -> &'static Arc<CrossEncoder> {
        shared_cross_encoder()
    }
}

impl Default for TestVault {
    fn default() -> Self {
        Self::new()
    }
}
