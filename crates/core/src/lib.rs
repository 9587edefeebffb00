//! Core types and shared functionality for http-cache.
//!
//! This crate provides:
//! - Rule filters deciding which exchanges are cacheable
//! - Cache key derivation and the on-disk response store
//! - The interception hooks and controller a proxy engine plugs into
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod intercept;

pub use cache::{CacheEntry, CacheKey, CacheKeyResolver, CacheStore};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use filter::{DEFAULT_RULES, Filter, FilterSet};
pub use intercept::{Exchange, InterceptionController, InterceptionHooks, Interceptor, ProxyEngine};
