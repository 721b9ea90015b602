//! A process-wide, LRU-evicted cache of at most `M` (default 3) loaded [`SearchEngine`]s.
//! The two ML models are loaded once and shared across every engine; only the embedding
//! store, BM25 index, and gleaning status cache are per-vault.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::bm25::Bm25Index;
use crate::config::VaultConfig;
use crate::embedding::{BiEncoder, CrossEncoder};
use crate::error::{Result, TemoaError};
use crate::pipeline::SearchContext;
use crate::status;
use crate::store::EmbeddingStore;
use crate::types::GleaningStatusEntry;

pub const DEFAULT_CAPACITY: usize = 3;

/// One vault's fully loaded search state: embedding store, a freshly built BM25 index
/// (rebuilt on every load, since it's cheap relative to loading the embedding store), and
/// a cached gleaning status sidecar.
pub struct SearchEngine {
    pub vault_root: PathBuf,
    pub model_name: String,
    pub store: EmbeddingStore,
    pub bm25: Bm25Index,
    pub gleaning_status: BTreeMap<String, GleaningStatusEntry>,
}

impl SearchEngine {
    fn load(vault_root: &Path, model_name: &str, dim: usize, tag_boost: f64, force: bool) -> Result<Self> {
        let store = EmbeddingStore::load(vault_root, model_name, dim, force)?.ok_or_else(|| {
            TemoaError::index(format!(
                "no index found for {} under model '{model_name}'; run reindex first",
                vault_root.display()
            ))
        })?;
        let bm25 = Bm25Index::build(&store.metadata, tag_boost);
        let gleaning_status = status::load(vault_root);
        Ok(Self { vault_root: vault_root.to_path_buf(), model_name: model_name.to_string(), store, bm25, gleaning_status })
    }

    /// Borrow a read-only [`SearchContext`] for a single pipeline run.
    pub fn context<'a>(&'a self, bi_encoder: &'a BiEncoder, cross_encoder: Option<&'a CrossEncoder>) -> SearchContext<'a> {
        SearchContext {
            store: &self.store,
            bm25: &self.bm25,
            bi_encoder,
            cross_encoder,
            gleaning_status: &self.gleaning_status,
            vault_root: &self.vault_root,
        }
    }
}

pub struct VaultRegistry {
    cache: Mutex<LruCache<String, Arc<SearchEngine>>>,
    bi_encoder: Arc<BiEncoder>,
    cross_encoder: Option<Arc<CrossEncoder>>,
    tag_boost: f64,
}

impl VaultRegistry {
    pub fn new(capacity: usize, bi_encoder: Arc<BiEncoder>, cross_encoder: Option<Arc<CrossEncoder>>, tag_boost: f64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { cache: Mutex::new(LruCache::new(capacity)), bi_encoder, cross_encoder, tag_boost }
    }

    pub fn bi_encoder(&self) -> &Arc<BiEncoder> {
        &self.bi_encoder
    }

    pub fn cross_encoder(&self) -> Option<&Arc<CrossEncoder>> {
        self.cross_encoder.as_ref()
    }

    /// Fetch a cached engine for `vault`, loading and inserting it on a cache miss.
    /// Eviction is LRU-wise across the whole registry, not per-vault.
    pub fn get_or_load(&self, vault: &VaultConfig) -> Result<Arc<SearchEngine>> {
        {
            let mut cache = self.cache.lock().expect("registry lock poisoned");
            if let Some(engine) = cache.get(&vault.name) {
                return Ok(engine.clone());
            }
        }

        let engine = Arc::new(SearchEngine::load(
            &vault.path,
            self.bi_encoder.name(),
            self.bi_encoder.dimension(),
            self.tag_boost,
            false,
        )?);

        let mut cache = self.cache.lock().expect("registry lock poisoned");
        cache.put(vault.name.clone(), engine.clone());
        Ok(engine)
    }

    /// Evict `vault_name`'s cached engine. Must be called after any external reindex or
    /// extract operation on that vault so the next query reloads fresh state — eviction
    /// is never implicit or time-based.
    pub fn invalidate(&self, vault_name: &str) {
        self.cache.lock().expect("registry lock poisoned").pop(vault_name);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().expect("registry lock poisoned").len()
    }
}
