//! Temoa binary — CLI shell over the [`temoa_server`] library crate.

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use temoa_core::embedding::{BiEncoder, CrossEncoder};
use temoa_core::registry::{VaultRegistry, DEFAULT_CAPACITY};
use temoa_core::Config;

use temoa_server::api::*;
use temoa_server::state::AppContext;

/// Semantic search service for a personal Markdown note vault.
#[derive(Parser)]
#[command(name = "temoa", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration document (default: $XDG_CONFIG_HOME/temoa/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP search surface.
    Serve {
        /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost).
        #[arg(long)]
        bind_all: bool,
    },
    /// Build or incrementally update a vault's index.
    Reindex {
        /// Vault name from configuration (default: the configured default vault).
        vault: Option<String>,
        /// Bypass the vault-path mismatch guard.
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration and report the health of every configured vault's index.
    Doctor,
}

fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TEMOA_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("temoa").join("config.toml")
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down...");
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("temoa=info".parse().unwrap()),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let config = Config::load(&config_path).unwrap_or_else(|e| {
        error!(path = %config_path.display(), error = %e, "failed to load configuration");
        std::process::exit(1);
    });

    match cli.command {
        Commands::Serve { bind_all } => run_serve(config, bind_all).await,
        Commands::Reindex { vault, force } => run_reindex(config, vault, force),
        Commands::Doctor => run_doctor(config),
    }
}

fn load_models(config: &Config) -> (Arc<BiEncoder>, Option<Arc<CrossEncoder>>) {
    let bi_encoder = BiEncoder::load(&config.default_model).unwrap_or_else(|e| {
        error!(model = config.default_model.as_str(), error = %e, "failed to load bi-encoder");
        std::process::exit(1);
    });

    // Cross-encoder reranking is opt-in per profile; absence here just disables Stage 5
    // for every profile that would otherwise request it, rather than failing startup.
    let cross_encoder = match CrossEncoder::load("bge-reranker-base") {
        Ok(m) => Some(Arc::new(m)),
        Err(e) => {
            warn!(error = %e, "cross-encoder unavailable, Stage 5 reranking disabled");
            None
        }
    };

    (Arc::new(bi_encoder), cross_encoder)
}

async fn run_serve(config: Config, bind_all: bool) {
    let (bi_encoder, cross_encoder) = load_models(&config);
    let registry = Arc::new(VaultRegistry::new(DEFAULT_CAPACITY, bi_encoder, cross_encoder, config.bm25.tag_boost));
    let ctx = AppContext {
        config: Arc::new(config),
        registry,
        start_time: std::time::Instant::now(),
        vault_locks: temoa_server::state::VaultLocks::default(),
    };

    let app = Router::new()
        .route("/health", get(api_health))
        .route("/api/vaults", get(api_vaults))
        .route("/api/profiles", get(api_profiles))
        .route("/api/search", post(api_search))
        .route("/api/reindex", post(api_reindex))
        .route("/api/gleaning/:gleaning_id/status", post(api_set_gleaning_status))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    let bind_addr = if bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port = port, error = %e, "could not bind to port");
            std::process::exit(1);
        })
    } else {
        const BASE: u16 = 8732;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            if let Ok(l) = tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                found = Some(l);
                break;
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "no free port found");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().unwrap().port();
    info!(port = port, "http://{bind_addr}:{port}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}

fn run_reindex(config: Config, vault_name: Option<String>, force: bool) {
    let vault = match &vault_name {
        Some(name) => config.vault_by_name(name),
        None => config.default_vault(),
    }
    .unwrap_or_else(|e| {
        error!(error = %e, "cannot resolve vault");
        std::process::exit(1);
    });

    let (bi_encoder, _) = load_models(&config);
    let started = std::time::Instant::now();
    let (_, stats) = temoa_core::indexer::reindex(
        &vault.path,
        &temoa_core::vault::VaultGlobs::default(),
        bi_encoder.name(),
        &bi_encoder,
        temoa_core::chunk::ChunkParams::default(),
        force,
    )
    .unwrap_or_else(|e| {
        error!(vault = vault.name.as_str(), error = %e, "reindex failed");
        std::process::exit(1);
    });

    info!(
        vault = vault.name.as_str(),
        added = stats.files_added,
        modified = stats.files_modified,
        deleted = stats.files_deleted,
        total_rows = stats.total_rows,
        time_ms = started.elapsed().as_millis() as u64,
        "reindex complete"
    );
}

fn run_doctor(config: Config) {
    let mut ok = true;
    if config.vaults.is_empty() {
        warn!("no vaults configured");
        ok = false;
    }
    for vault in &config.vaults {
        if !vault.path.is_dir() {
            error!(vault = vault.name.as_str(), path = %vault.path.display(), "vault path does not exist");
            ok = false;
            continue;
        }
        let index_dir = vault.path.join(".temoa").join(&config.default_model);
        if !index_dir.join("index.json").exists() {
            warn!(vault = vault.name.as_str(), "no index yet; run `temoa reindex {}`", vault.name);
            continue;
        }
        info!(vault = vault.name.as_str(), "index present");
    }
    if config.default_vault().is_err() {
        warn!("no default vault configured or resolvable");
    }
    if !ok {
        std::process::exit(1);
    }
}
