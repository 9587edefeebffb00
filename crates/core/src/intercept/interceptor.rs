//! The per-exchange caching decisions.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use super::{Exchange, InterceptionHooks};
use crate::Error;
use crate::cache::{CacheEntry, CacheKey, CacheKeyResolver, CacheStore};
use crate::filter::FilterSet;

/// Outcome of the pre-request hook.
#[derive(Debug)]
pub enum Lookup {
    /// No filter matched; the exchange was left alone.
    Bypassed,
    /// Matched, nothing stored yet; the exchange goes to the network.
    Miss(CacheKey),
    /// Matched and answered from the store.
    Hit(CacheKey),
    /// Matched, but the stored entry could not be read. The exchange goes to the network.
    Failed(Error),
}

/// Why the post-response hook did not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ServedFromCache,
    NotMatched,
    NoResponse,
}

/// Outcome of the post-response hook.
///
/// Writing is best effort: a `Failed` outcome is logged by the hook and never reaches
/// the exchange.
#[derive(Debug)]
pub enum CacheWrite {
    Skipped(SkipReason),
    Stored(CacheKey),
    Failed(Error),
}

/// Filter snapshot, key resolver and store wired into the two proxy hooks.
pub struct Interceptor {
    filters: ArcSwap<FilterSet>,
    reload_lock: Mutex<()>,
    in_flight: AtomicI64,
    resolver: CacheKeyResolver,
    store: CacheStore,
}

impl Interceptor {
    /// Create an interceptor with an empty rule set.
    pub fn new(resolver: CacheKeyResolver, store: CacheStore) -> Self {
        Self {
            filters: ArcSwap::from_pointee(FilterSet::default()),
            reload_lock: Mutex::new(()),
            in_flight: AtomicI64::new(0),
            resolver,
            store,
        }
    }

    /// Compile `text` and install it as the active rule set.
    ///
    /// On error the active set is left untouched. Returns the number of filters.
    pub fn reload(&self, text: &str) -> Result<usize, Error> {
        let _guard = self.reload_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let set = match FilterSet::compile(text) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(error = %e, "rejected rule set");
                return Err(e);
            }
        };

        let count = set.len();
        self.filters.store(Arc::new(set));
        tracing::info!(filters = count, "rule set installed");
        Ok(count)
    }

    /// Current rule set snapshot.
    pub fn filters(&self) -> Arc<FilterSet> {
        self.filters.load_full()
    }

    pub fn should_process(&self, method: &str, url: &str) -> bool {
        self.filters.load().should_process(method, url)
    }

    /// Exchanges that entered the pre-request hook and have not left the post-response hook.
    ///
    /// Diagnostic only: aborted exchanges never reach the second hook.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn resolver(&self) -> &CacheKeyResolver {
        &self.resolver
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn on_before_request(&self, exchange: &mut dyn Exchange) -> Lookup {
        self.in_flight.fetch_add(1, Ordering::Relaxed);

        let (method, url) = (exchange.method(), exchange.full_url());
        if !self.should_process(method, url) {
            return Lookup::Bypassed;
        }

        let key = self.resolver.resolve(url);
        if !self.store.exists(&key) {
            return Lookup::Miss(key);
        }

        match self.store.load(&key) {
            Ok(entry) => {
                tracing::info!(method, url, key = %key, "serving from cache");
                exchange.respond_with(entry);
                exchange.set_served_from_cache(true);
                Lookup::Hit(key)
            }
            Err(e) if e.is_miss() => Lookup::Miss(key),
            Err(e) => {
                tracing::error!(method, url, error = %e, "cache entry unreadable, fetching from network");
                Lookup::Failed(e)
            }
        }
    }

    pub fn on_after_response(&self, exchange: &dyn Exchange) -> CacheWrite {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        if exchange.served_from_cache() {
            return CacheWrite::Skipped(SkipReason::ServedFromCache);
        }

        let (method, url) = (exchange.method(), exchange.full_url());
        if !self.should_process(method, url) {
            return CacheWrite::Skipped(SkipReason::NotMatched);
        }

        let Some(response) = exchange.response() else {
            tracing::debug!(method, url, "no response to cache");
            return CacheWrite::Skipped(SkipReason::NoResponse);
        };

        self.write(url, response)
    }

    fn write(&self, url: &str, response: &CacheEntry) -> CacheWrite {
        let key = self.resolver.resolve(url);
        tracing::info!(url, key = %key, status = response.status, "adding to cache");

        match self.store.save(&key, response) {
            Ok(()) => CacheWrite::Stored(key),
            Err(e) => {
                tracing::warn!(url, error = %e, "failed to add to cache");
                CacheWrite::Failed(e)
            }
        }
    }
}

impl InterceptionHooks for Interceptor {
    fn before_request(&self, exchange: &mut dyn Exchange) {
        let _ = self.on_before_request(exchange);
    }

    fn after_response(&self, exchange: &dyn Exchange) {
        let _ = self.on_after_response(exchange);
    }
}
