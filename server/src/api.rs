//! HTTP API handlers for the Temoa search surface.
//!
//! Every handler speaks JSON in and out; failures are reported as
//! `(StatusCode, Json<Value>)` tuples rather than a boxed error type, matching this
//! lineage's existing preference for explicit, dependency-free error plumbing at the
//! transport boundary.

use std::collections::BTreeMap;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use temoa_core::profile::SearchProfile;
use temoa_core::{error::TemoaError, indexer, pipeline, SearchRequest};

use crate::state::AppContext;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// A vault already has a write in flight (spec.md §5 "write-write... forbidden"). The
/// caller should retry, not queue behind it.
fn busy_response(vault_name: &str) -> ApiError {
    error_response(
        StatusCode::CONFLICT,
        format!("vault '{vault_name}' is already being reindexed; try again shortly"),
    )
}

/// Run blocking core work off the async executor (spec.md §5: model inference, index
/// load, and the index-time walk/embed/save cycle are all suspension points that must not
/// block the event loop). Panics inside `f` surface as an internal server error rather
/// than taking down the worker thread.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal task panicked"))?
}

fn map_core_error(e: TemoaError) -> ApiError {
    let status = match e {
        TemoaError::VaultRead { .. } => StatusCode::NOT_FOUND,
        TemoaError::VaultMismatch { .. } => StatusCode::CONFLICT,
        TemoaError::Config { .. } => StatusCode::BAD_REQUEST,
        TemoaError::SearchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        TemoaError::Search { .. } => StatusCode::BAD_REQUEST,
        TemoaError::Index { .. } | TemoaError::Model { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

/// Resolve a profile name against custom config profiles first, then the five built-ins.
fn resolve_profile(config: &temoa_core::Config, name: &str) -> Result<(String, SearchProfile), ApiError> {
    if let Some(profile) = config.search_profiles.get(name) {
        return Ok((name.to_string(), profile.clone()));
    }
    SearchProfile::builtin(name)
        .map(|p| (name.to_string(), p))
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("unknown search profile '{name}'")))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn api_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "vaults_configured": ctx.config.vaults.len(),
        "vaults_cached": ctx.registry.cached_len(),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

// ---------------------------------------------------------------------------
// Vaults
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct VaultSummary {
    name: String,
    is_default: bool,
}

pub async fn api_vaults(State(ctx): State<AppContext>) -> impl IntoResponse {
    let vaults: Vec<VaultSummary> = ctx
        .config
        .vaults
        .iter()
        .map(|v| VaultSummary { name: v.name.clone(), is_default: v.is_default })
        .collect();
    Json(vaults)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchRequestBody {
    pub query: String,
    pub vault: Option<String>,
    pub profile: Option<String>,
    pub limit: Option<usize>,
    pub hybrid: Option<bool>,
    pub rerank: Option<bool>,
    pub expand_query: Option<bool>,
    pub time_boost: Option<bool>,
    pub min_score: Option<f32>,
    pub include_types: Option<Vec<String>>,
    pub exclude_types: Option<Vec<String>>,
    #[serde(default)]
    pub trace: bool,
    pub timeout_ms: Option<u64>,
}

pub async fn api_search(
    State(ctx): State<AppContext>,
    Json(body): Json<SearchRequestBody>,
) -> Result<Json<pipeline::SearchResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "query must not be empty"));
    }

    let vault = match &body.vault {
        Some(name) => ctx.config.vault_by_name(name).map_err(map_core_error)?,
        None => ctx.config.default_vault().map_err(map_core_error)?,
    };

    let profile_name = body.profile.clone().unwrap_or_else(|| "default".to_string());
    let (profile_name, profile) = resolve_profile(&ctx.config, &profile_name)?;
    let vault = vault.clone();

    // Read-read is always safe; this just waits out any in-progress reindex on the same
    // vault (spec.md §5 "read-write is serialized at vault granularity").
    let _read_guard = ctx.vault_locks.read(&vault.name).await;

    let registry = ctx.registry.clone();
    let now = chrono::Utc::now();
    let request = SearchRequest {
        query: body.query,
        vault: body.vault,
        profile: Some(profile_name.clone()),
        limit: body.limit,
        hybrid: body.hybrid,
        rerank: body.rerank,
        expand_query: body.expand_query,
        time_boost: body.time_boost,
        min_score: body.min_score,
        include_types: body.include_types,
        exclude_types: body.exclude_types,
        trace: body.trace,
        timeout_ms: body.timeout_ms,
    };
    let default_timeout_ms = ctx.config.search.timeout_ms;

    let response = run_blocking(move || {
        let engine = registry.get_or_load(&vault).map_err(map_core_error)?;
        let bi_encoder = registry.bi_encoder();
        let cross_encoder = registry.cross_encoder().map(|c| c.as_ref());
        let search_ctx = engine.context(bi_encoder, cross_encoder);
        pipeline::run(&search_ctx, &profile_name, &profile, &request, now, default_timeout_ms)
            .map_err(map_core_error)
    })
    .await?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Reindex
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ReindexRequestBody {
    pub vault: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
pub struct ReindexResponseBody {
    vault: String,
    files_added: usize,
    files_modified: usize,
    files_deleted: usize,
    rows_added: usize,
    rows_removed: usize,
    total_rows: usize,
}

pub async fn api_reindex(
    State(ctx): State<AppContext>,
    Json(body): Json<ReindexRequestBody>,
) -> Result<Json<ReindexResponseBody>, ApiError> {
    let vault = match &body.vault {
        Some(name) => ctx.config.vault_by_name(name).map_err(map_core_error)?,
        None => ctx.config.default_vault().map_err(map_core_error)?,
    }
    .clone();

    // Write-write on the same vault is forbidden (spec.md §5): fail fast with a busy
    // error rather than queuing behind an in-progress reindex.
    let Some(_write_guard) = ctx.vault_locks.try_write(&vault.name) else {
        return Err(busy_response(&vault.name));
    };

    let registry = ctx.registry.clone();
    let force = body.force;
    let stats = run_blocking(move || {
        let bi_encoder = registry.bi_encoder();
        let (_, stats) = indexer::reindex(
            &vault.path,
            &temoa_core::vault::VaultGlobs::default(),
            bi_encoder.name(),
            bi_encoder,
            temoa_core::chunk::ChunkParams::default(),
            force,
        )
        .map_err(map_core_error)?;
        Ok((vault, stats))
    })
    .await?;
    let (vault, stats) = stats;

    // Mutating operations must invalidate the vault's cached engine (spec.md §4.9/§6).
    ctx.registry.invalidate(&vault.name);

    Ok(Json(ReindexResponseBody {
        vault: vault.name.clone(),
        files_added: stats.files_added,
        files_modified: stats.files_modified,
        files_deleted: stats.files_deleted,
        rows_added: stats.rows_added,
        rows_removed: stats.rows_removed,
        total_rows: stats.total_rows,
    }))
}

// ---------------------------------------------------------------------------
// Gleaning status
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SetGleaningStatusBody {
    pub vault: Option<String>,
    pub status: temoa_core::types::GleaningStatus,
    #[serde(default)]
    pub reason: String,
}

pub async fn api_set_gleaning_status(
    State(ctx): State<AppContext>,
    AxumPath(gleaning_id): AxumPath<String>,
    Json(body): Json<SetGleaningStatusBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let vault = match &body.vault {
        Some(name) => ctx.config.vault_by_name(name).map_err(map_core_error)?,
        None => ctx.config.default_vault().map_err(map_core_error)?,
    }
    .clone();

    let Some(_write_guard) = ctx.vault_locks.try_write(&vault.name) else {
        return Err(busy_response(&vault.name));
    };

    let vault_path = vault.path.clone();
    let status = body.status;
    let reason = body.reason.clone();
    run_blocking(move || {
        temoa_core::status::set_status(&vault_path, &gleaning_id, status, &reason).map_err(map_core_error)
    })
    .await?;
    ctx.registry.invalidate(&vault.name);

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Serialize)]
pub struct ProfileSummary {
    name: String,
    display_name: String,
    description: String,
}

pub async fn api_profiles(State(ctx): State<AppContext>) -> impl IntoResponse {
    let mut profiles: BTreeMap<String, ProfileSummary> = temoa_core::profile::BUILTIN_PROFILE_NAMES
        .iter()
        .filter_map(|name| SearchProfile::builtin(name).map(|p| (name.to_string(), p)))
        .map(|(name, p)| {
            (name.clone(), ProfileSummary { name, display_name: p.display_name, description: p.description })
        })
        .collect();

    for (name, p) in &ctx.config.search_profiles {
        profiles.insert(
            name.clone(),
            ProfileSummary {
                name: name.clone(),
                display_name: p.display_name.clone(),
                description: p.description.clone(),
            },
        );
    }

    Json(profiles.into_values().collect::<Vec<_>>())
}
