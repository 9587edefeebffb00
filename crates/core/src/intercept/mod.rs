//! Seams between the caching layer and a proxy engine.
//!
//! A proxy engine owns the transport. It hands every exchange to two hooks: one before
//! any upstream fetch and one after the exchange completes. The caching layer only sees
//! exchanges through the [`Exchange`] capability set, so a real proxy session and a test
//! double are interchangeable.

mod controller;
mod interceptor;

pub use controller::InterceptionController;
pub use interceptor::{CacheWrite, Interceptor, Lookup, SkipReason};

use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;
use crate::cache::CacheEntry;

/// One in-flight request/response pair as seen by the hooks.
pub trait Exchange: Send {
    fn method(&self) -> &str;

    /// Absolute request URL, or `host:port` for CONNECT.
    fn full_url(&self) -> &str;

    /// Complete the exchange with `response` without contacting upstream.
    fn respond_with(&mut self, response: CacheEntry);

    /// The response, once one exists.
    fn response(&self) -> Option<&CacheEntry>;

    fn served_from_cache(&self) -> bool;

    fn set_served_from_cache(&mut self, served: bool);
}

/// Lifecycle callbacks installed into a proxy engine.
///
/// Engines call these concurrently for many exchanges. Both hooks are synchronous and
/// may touch the disk, so async engines should run them on a blocking thread.
pub trait InterceptionHooks: Send + Sync {
    /// Called once per exchange before upstream is contacted.
    fn before_request(&self, exchange: &mut dyn Exchange);

    /// Called once per exchange after it completed, from cache or from the network.
    fn after_response(&self, exchange: &dyn Exchange);
}

/// A transport that can run exchanges through [`InterceptionHooks`].
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Install `hooks` and bring the transport up.
    async fn start(&self, hooks: Arc<dyn InterceptionHooks>) -> Result<(), Error>;

    /// Remove the hooks and tear the transport down.
    async fn stop(&self) -> Result<(), Error>;
}
