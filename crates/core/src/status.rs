//! Gleaning status sidecar: `{vault}/.temoa/gleaning_status.json`, a map of
//! `gleaning_id -> {status, reason, updated_at, history}` owned and written by external
//! gleaning tooling. The search engine only ever reads it.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::types::{GleaningStatus, GleaningStatusEntry};

const STATUS_FILE: &str = "gleaning_status.json";

/// Load the sidecar for `vault_root`. A missing file is not an error — unknown ids
/// default to active — so this returns an empty map rather than failing. A malformed
/// file fails open the same way, logging at debug level.
pub fn load(vault_root: &Path) -> BTreeMap<String, GleaningStatusEntry> {
    let path = vault_root.join(".temoa").join(STATUS_FILE);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "malformed gleaning status sidecar, treating as empty");
            BTreeMap::new()
        }
    }
}

/// Set (or create) one gleaning id's status, pushing its previous entry onto `history`.
/// This sidecar is nominally owned by external gleaning tooling; the HTTP surface exposes
/// this as a thin pass-through so that tooling can update status without touching the
/// file directly.
pub fn set_status(vault_root: &Path, gleaning_id: &str, status: GleaningStatus, reason: &str) -> Result<()> {
    let dir = vault_root.join(".temoa");
    let path = dir.join(STATUS_FILE);
    let mut statuses = load(vault_root);

    let now = chrono::Utc::now();
    let mut history = Vec::new();
    if let Some(previous) = statuses.get(gleaning_id) {
        history = previous.history.clone();
        history.push(serde_json::json!({
            "status": previous.status,
            "reason": previous.reason,
            "updated_at": previous.updated_at,
        }));
    }

    statuses.insert(
        gleaning_id.to_string(),
        GleaningStatusEntry { status, reason: reason.to_string(), updated_at: now, history },
    );

    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(&statuses)?;
    std::fs::write(&path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GleaningStatus;

    #[test]
    fn missing_sidecar_yields_empty_map() {
        let dir = tempfile::TempDir::new().unwrap();
        let statuses = load(dir.path());
        assert!(statuses.is_empty());
    }

    #[test]
    fn malformed_sidecar_yields_empty_map_rather_than_erroring() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".temoa")).unwrap();
        std::fs::write(dir.path().join(".temoa").join(STATUS_FILE), "not json").unwrap();
        let statuses = load(dir.path());
        assert!(statuses.is_empty());
    }

    #[test]
    fn loads_well_formed_sidecar() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".temoa")).unwrap();
        std::fs::write(
            dir.path().join(".temoa").join(STATUS_FILE),
            r#"{"g1": {"status": "inactive", "reason": "superseded", "updated_at": "2025-01-01T00:00:00Z", "history": []}}"#,
        )
        .unwrap();
        let statuses = load(dir.path());
        assert_eq!(statuses["g1"].status, GleaningStatus::Inactive);
    }
}
