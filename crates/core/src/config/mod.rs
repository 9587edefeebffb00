//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HTTP_CACHE_*)
//! 2. TOML config file (if HTTP_CACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKeyResolver, CacheStore, DEFAULT_EXCLUDED_PARAMS};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HTTP_CACHE_*)
/// 2. TOML config file (if HTTP_CACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding cache entry files.
    ///
    /// Set via HTTP_CACHE_CACHE_DIR environment variable.
    #[serde(default = "CacheStore::default_root")]
    pub cache_dir: PathBuf,

    /// Address the proxy listens on.
    ///
    /// Set via HTTP_CACHE_LISTEN_ADDR environment variable.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Query parameters stripped from URLs before computing cache keys.
    ///
    /// Set via HTTP_CACHE_EXCLUDED_PARAMS environment variable.
    #[serde(default = "default_excluded_params")]
    pub excluded_params: Vec<String>,

    /// Rule file read once at startup. Without it the commented starter rules apply.
    ///
    /// Set via HTTP_CACHE_RULES_FILE environment variable.
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Start intercepting as soon as the server boots.
    ///
    /// Set via HTTP_CACHE_AUTOSTART environment variable.
    #[serde(default)]
    pub autostart: bool,

    /// Upstream request timeout in milliseconds.
    ///
    /// Set via HTTP_CACHE_UPSTREAM_TIMEOUT_MS environment variable.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Largest request or response body the proxy will buffer.
    ///
    /// Set via HTTP_CACHE_MAX_BODY_BYTES environment variable.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8877".into()
}

fn default_excluded_params() -> Vec<String> {
    DEFAULT_EXCLUDED_PARAMS.iter().map(|p| p.to_string()).collect()
}

fn default_upstream_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: CacheStore::default_root(),
            listen_addr: default_listen_addr(),
            excluded_params: default_excluded_params(),
            rules_file: None,
            autostart: false,
            upstream_timeout_ms: default_upstream_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl AppConfig {
    /// Upstream timeout as Duration for use with reqwest/tokio.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `listen_addr` is not `ip:port`.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|e| ConfigError::Invalid {
            field: "listen_addr".into(),
            reason: format!("{e}"),
        })
    }

    pub fn key_resolver(&self) -> CacheKeyResolver {
        CacheKeyResolver::new(self.excluded_params.iter().cloned())
    }

    pub fn cache_store(&self) -> CacheStore {
        CacheStore::new(self.cache_dir.clone())
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HTTP_CACHE_`
    /// 2. TOML file from `HTTP_CACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HTTP_CACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HTTP_CACHE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
