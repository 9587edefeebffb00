//! Unified error types for http-cache.
//!
//! Display strings carry a stable code prefix so operators can grep logs and
//! MCP clients can switch on the JSON-RPC code.

use std::path::PathBuf;

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Unified error types for the caching layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A rule line failed to compile. The whole rule set is rejected.
    #[error("INVALID_PATTERN: line {line}: `{rule}`: {source}")]
    InvalidPattern {
        line: usize,
        rule: String,
        #[source]
        source: regex::Error,
    },

    /// No cache entry exists for the given key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// An entry exists but could not be read or decoded.
    #[error("CACHE_READ_FAILED: {}: {reason}", path.display())]
    CacheRead { path: PathBuf, reason: String },

    /// Writing an entry failed.
    #[error("CACHE_WRITE_FAILED: {}: {source}", path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The proxy engine failed to start or stop.
    #[error("TRANSPORT_ERROR: {0}")]
    Transport(String),

    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error means "nothing stored", as opposed to a broken entry.
    pub fn is_miss(&self) -> bool {
        matches!(self, Error::CacheMiss(_))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::InvalidPattern { .. } => -32003,
            Error::CacheMiss(_) => -32001,
            Error::CacheRead { .. } | Error::CacheWrite { .. } => -32002,
            Error::Transport(_) => -32004,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
