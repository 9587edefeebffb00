//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

const MAX_BODY_LIMIT: usize = 512 * 1024 * 1024;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `listen_addr` is not a socket address
    /// - `upstream_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_body_bytes` is 0 or exceeds 512MB
    /// - an excluded parameter name is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.upstream_timeout_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "upstream_timeout_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }
        if self.upstream_timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "upstream_timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_body_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_body_bytes > MAX_BODY_LIMIT {
            return Err(ConfigError::Invalid { field: "max_body_bytes".into(), reason: "must not exceed 512MB".into() });
        }

        if self.excluded_params.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "excluded_params".into(),
                reason: "entries must not be empty".into(),
            });
        }

        if self.excluded_params.is_empty() {
            tracing::warn!("excluded_params is empty; tracking tokens will become part of cache keys");
        }

        Ok(())
    }
}
