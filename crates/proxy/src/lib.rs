//! Reference proxy engine for http-cache.
//!
//! A small HTTP/1.1 forward proxy that runs the core interception hooks around every
//! exchange. Plain HTTP requests can be answered from cache; CONNECT is tunnelled.

mod engine;
mod error;
mod exchange;
pub mod request;
mod upstream;

pub use engine::{EngineConfig, HttpProxyEngine};
pub use error::ProxyError;
pub use exchange::ProxyExchange;
pub use request::{MAX_HEAD_BYTES, RequestHead};
pub use upstream::UpstreamClient;
