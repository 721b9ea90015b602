//! Shared application state handed to every axum handler.
//!
//! Concurrency model (spec.md §5): read-read on a vault is always safe (the registry's
//! loaded engines are treated as immutable for their lifetime); read-write is serialized
//! at vault granularity via [`VaultLocks`]; write-write is rejected outright with a busy
//! error rather than queued, so a client retries instead of stacking up indexing runs.
//! This mirrors the teacher's `Arc<RwLock<ServerState>>` guard in `server/src/api.rs`,
//! generalized from one process-wide lock to one lock per vault name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use temoa_core::{Config, VaultRegistry};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: Arc<VaultRegistry>,
    pub start_time: Instant,
    pub vault_locks: VaultLocks,
}

/// A lock per vault name, created lazily on first access. Queries acquire the read side
/// (many concurrent readers; waits behind an in-progress write); reindex and gleaning
/// status writes acquire the write side via `try_write`, failing fast with "busy" rather
/// than queuing behind another writer (spec.md §5 "write-write... must be rejected").
#[derive(Clone, Default)]
pub struct VaultLocks {
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl VaultLocks {
    fn lock_for(&self, vault_name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().expect("vault lock map poisoned");
        locks.entry(vault_name.to_string()).or_insert_with(|| Arc::new(RwLock::new(()))).clone()
    }

    /// Await a read guard for `vault_name`: waits for any in-progress write to finish,
    /// never fails outright (queries wait rather than fail fast, spec.md §5).
    pub async fn read(&self, vault_name: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(vault_name).read_owned().await
    }

    /// Try to acquire the write guard for `vault_name` without waiting. `None` means
    /// another write is already in flight for this vault — the caller must reject the
    /// request with a busy error instead of blocking on it.
    pub fn try_write(&self, vault_name: &str) -> Option<OwnedRwLockWriteGuard<()>> {
        self.lock_for(vault_name).try_write_owned().ok()
    }
}
