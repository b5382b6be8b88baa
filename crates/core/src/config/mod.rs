//! Dedup configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (METALINK_*)
//! 2. TOML config file (if METALINK_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Dedup configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (METALINK_*)
/// 2. TOML config file (if METALINK_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Path to the SQLite dedup store.
    ///
    /// Set via METALINK_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Response header naming the canonical resource.
    ///
    /// Set via METALINK_LOCATION_HEADER environment variable.
    #[serde(default = "default_location_header")]
    pub location_header: String,

    /// Response header carrying instance digests.
    ///
    /// Set via METALINK_DIGEST_HEADER environment variable.
    #[serde(default = "default_digest_header")]
    pub digest_header: String,

    /// Record `digest -> request URL` for origin response bodies.
    #[serde(default = "default_true")]
    pub record_enabled: bool,

    /// Rewrite announced locations to previously recorded URLs.
    #[serde(default = "default_true")]
    pub resolve_enabled: bool,

    /// Only rewrite when the recorded URL itself still has a cache entry.
    #[serde(default)]
    pub verify_recorded_url: bool,

    /// Largest recorded URL accepted from the store, in bytes.
    #[serde(default = "default_max_recorded_url_bytes")]
    pub max_recorded_url_bytes: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./metalink-dedup.sqlite")
}

fn default_location_header() -> String {
    "Location".into()
}

fn default_digest_header() -> String {
    "Digest".into()
}

fn default_max_recorded_url_bytes() -> usize {
    8192
}

fn default_true() -> bool {
    true
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            location_header: default_location_header(),
            digest_header: default_digest_header(),
            record_enabled: true,
            resolve_enabled: true,
            verify_recorded_url: false,
            max_recorded_url_bytes: default_max_recorded_url_bytes(),
        }
    }
}

impl DedupConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("METALINK_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("METALINK_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
