//! Global configuration document: vault registry, default model, search defaults, BM25
//! tuning, and custom search profiles. Parsed once at process startup with `toml` +
//! `serde`, the same stack the rest of this lineage uses for its own project config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, TemoaError};
use crate::profile::SearchProfile;

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchDefaults {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_max_boost")]
    pub max_boost: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    /// Per-request time budget (spec.md §5 "Timeouts: configurable per request"), applied
    /// when a request doesn't override it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_limit() -> usize {
    10
}
fn default_min_score() -> f32 {
    0.3
}
fn default_max_boost() -> f64 {
    0.2
}
fn default_half_life_days() -> f64 {
    90.0
}
fn default_timeout_ms() -> u64 {
    8_000
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_score: default_min_score(),
            max_boost: default_max_boost(),
            half_life_days: default_half_life_days(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bm25Config {
    #[serde(default = "default_tag_boost")]
    pub tag_boost: f64,
}

fn default_tag_boost() -> f64 {
    5.0
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { tag_boost: default_tag_boost() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub default_model: String,
    #[serde(default)]
    pub vaults: Vec<VaultConfig>,
    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default)]
    pub bm25: Bm25Config,
    #[serde(default)]
    pub search_profiles: BTreeMap<String, SearchProfile>,
}

impl Config {
    /// Load and validate a config document from `path`, performing `~` expansion on
    /// vault paths. Fails closed (`ConfigError`) on malformed TOML, more than one
    /// `is_default` vault, or a custom profile name shadowing a built-in one — see
    /// SPEC_FULL.md §3 for the reasoning behind accepting zero vaults at load time.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TemoaError::config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Config =
            toml::from_str(&raw).map_err(|e| TemoaError::config(e.to_string()))?;

        for vault in &mut config.vaults {
            vault.path = expand_home(&vault.path);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let default_count = self.vaults.iter().filter(|v| v.is_default).count();
        if default_count > 1 {
            return Err(TemoaError::config("more than one vault marked is_default"));
        }

        for name in self.search_profiles.keys() {
            if SearchProfile::is_builtin_name(name) {
                return Err(TemoaError::config(format!(
                    "custom search profile '{name}' shadows a built-in profile"
                )));
            }
        }

        Ok(())
    }

    /// Resolve the default vault, failing closed if none is configured or marked
    /// default. Unlike config load, this is only checked lazily at first query — see
    /// SPEC_FULL.md §3's Open-Question resolution.
    pub fn default_vault(&self) -> Result<&VaultConfig> {
        if self.vaults.is_empty() {
            return Err(TemoaError::config("no vaults configured"));
        }
        self.vaults
            .iter()
            .find(|v| v.is_default)
            .ok_or_else(|| TemoaError::config("no default vault configured"))
    }

    pub fn vault_by_name(&self, name: &str) -> Result<&VaultConfig> {
        self.vaults
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| TemoaError::config(format!("no vault named '{name}'")))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Some(stripped) = path.to_str().and_then(|s| s.strip_prefix("~/")) else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(stripped),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_minimal_config() {
        let (_dir, path) = write_config(
            r#"
            default_model = "bge-small-en-v1.5"

            [[vaults]]
            name = "personal"
            path = "/tmp/personal-vault"
            is_default = true
            "#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_model, "bge-small-en-v1.5");
        assert_eq!(config.search.limit, 10);
        assert!(config.default_vault().is_ok());
    }

    #[test]
    fn rejects_multiple_default_vaults() {
        let (_dir, path) = write_config(
            r#"
            default_model = "bge-small-en-v1.5"

            [[vaults]]
            name = "a"
            path = "/tmp/a"
            is_default = true

            [[vaults]]
            name = "b"
            path = "/tmp/b"
            is_default = true
            "#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn rejects_profile_shadowing_builtin() {
        let (_dir, path) = write_config(
            r#"
            default_model = "bge-small-en-v1.5"

            [search_profiles.default]
            "#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn accepts_zero_vaults_at_load_but_fails_default_vault_lookup() {
        let (_dir, path) = write_config(r#"default_model = "bge-small-en-v1.5""#);
        let config = Config::load(&path).unwrap();
        assert!(config.default_vault().is_err());
    }
}
