//! Error kinds shared across the indexing and query-time surfaces.
//!
//! The crate avoids an error-derive macro and writes `Display`/`Error` by hand, matching
//! the rest of the stack's preference for explicit, dependency-free trait impls.

use std::fmt;
use std::path::PathBuf;

/// A fallible operation's failure kind. Names track the conceptual error kinds used
/// throughout the engine: vault I/O, persisted-index corruption, vault/sidecar mismatch,
/// model load/inference failure, fatal query failures, timeouts, and config problems.
#[derive(Debug)]
pub enum TemoaError {
    VaultRead { path: PathBuf, message: String },
    Index { message: String },
    VaultMismatch { expected: PathBuf, found: PathBuf },
    Model { message: String },
    Search { message: String },
    SearchTimeout { elapsed_ms: u64, budget_ms: u64 },
    Config { message: String },
}

impl TemoaError {
    pub fn vault_read(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VaultRead { path: path.into(), message: message.into() }
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::Index { message: message.into() }
    }

    pub fn vault_mismatch(expected: impl Into<PathBuf>, found: impl Into<PathBuf>) -> Self {
        Self::VaultMismatch { expected: expected.into(), found: found.into() }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model { message: message.into() }
    }

    pub fn search(message: impl Into<String>) -> Self {
        Self::Search { message: message.into() }
    }

    pub fn search_timeout(elapsed_ms: u64, budget_ms: u64) -> Self {
        Self::SearchTimeout { elapsed_ms, budget_ms }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}

impl fmt::Display for TemoaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VaultRead { path, message } => {
                write!(f, "vault read error at {}: {message}", path.display())
            }
            Self::Index { message } => write!(f, "index error: {message}"),
            Self::VaultMismatch { expected, found } => write!(
                f,
                "vault mismatch: index was built for {} but requested vault resolves to {}",
                expected.display(),
                found.display()
            ),
            Self::Model { message } => write!(f, "model error: {message}"),
            Self::Search { message } => write!(f, "search error: {message}"),
            Self::SearchTimeout { elapsed_ms, budget_ms } => {
                write!(f, "search timed out after {elapsed_ms}ms (budget {budget_ms}ms)")
            }
            Self::Config { message } => write!(f, "config error: {message}"),
        }
    }
}

impl std::error::Error for TemoaError {}

impl From<std::io::Error> for TemoaError {
    fn from(e: std::io::Error) -> Self {
        Self::Index { message: e.to_string() }
    }
}

impl From<serde_json::Error> for TemoaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Index { message: e.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, TemoaError>;
