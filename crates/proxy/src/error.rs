//! Errors raised while serving proxy connections.

use std::net::SocketAddr;

/// Error type for proxy transport failures.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("body of {size} bytes exceeds {limit}")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("chunked request bodies are not supported")]
    UnsupportedTransferEncoding,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("hook task failed: {0}")]
    Hook(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy engine already running")]
    AlreadyRunning,
}

impl ProxyError {
    /// Status line sent to the client when this error ends an exchange.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            ProxyError::MalformedRequest(_) => (400, "Bad Request"),
            ProxyError::HeadTooLarge(_) => (431, "Request Header Fields Too Large"),
            ProxyError::BodyTooLarge { .. } => (413, "Payload Too Large"),
            ProxyError::UnsupportedTransferEncoding => (501, "Not Implemented"),
            ProxyError::Upstream(_) => (502, "Bad Gateway"),
            _ => (500, "Internal Server Error"),
        }
    }
}

impl From<ProxyError> for httpcache_core::Error {
    fn from(err: ProxyError) -> Self {
        httpcache_core::Error::Transport(err.to_string())
    }
}
