//! Lifecycle and administrative surface of the caching layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use super::interceptor::{CacheWrite, Interceptor, Lookup};
use super::{Exchange, InterceptionHooks, ProxyEngine};
use crate::Error;
use crate::cache::{CacheKeyResolver, CacheStore, ClearSummary};

/// Owns the active rule set and connects the caching hooks to a proxy engine.
pub struct InterceptionController {
    interceptor: Arc<Interceptor>,
    engine: Arc<dyn ProxyEngine>,
    active: AtomicBool,
    lifecycle: Mutex<()>,
}

impl InterceptionController {
    pub fn new(resolver: CacheKeyResolver, store: CacheStore, engine: Arc<dyn ProxyEngine>) -> Self {
        Self {
            interceptor: Arc::new(Interceptor::new(resolver, store)),
            engine,
            active: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Replace the rule set. A rejected text leaves the previous rules in effect.
    pub fn reload(&self, rules: &str) -> Result<usize, Error> {
        self.interceptor.reload(rules)
    }

    /// Install the hooks and start the engine. Starting twice is a no-op.
    pub async fn start(&self) -> Result<(), Error> {
        let _guard = self.lifecycle.lock().await;

        if self.is_active() {
            tracing::info!("interception already active");
            return Ok(());
        }

        tracing::info!("starting proxy");
        let hooks: Arc<dyn InterceptionHooks> = self.interceptor.clone();
        self.engine.start(hooks).await?;
        self.active.store(true, Ordering::Release);
        tracing::info!("proxy started");

        Ok(())
    }

    /// Stop the engine and remove the hooks. Stopping an idle controller is a no-op.
    pub async fn stop(&self) -> Result<(), Error> {
        let _guard = self.lifecycle.lock().await;

        if !self.is_active() {
            tracing::debug!("interception not active");
            return Ok(());
        }

        tracing::info!("stopping proxy");
        self.engine.stop().await?;
        self.active.store(false, Ordering::Release);
        tracing::info!("proxy stopped");

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Delete every cached entry. Safe whether or not the proxy is running.
    pub fn clear_cache(&self) -> ClearSummary {
        self.interceptor.store().clear_all()
    }

    pub fn on_before_request(&self, exchange: &mut dyn Exchange) -> Lookup {
        self.interceptor.on_before_request(exchange)
    }

    pub fn on_after_response(&self, exchange: &dyn Exchange) -> CacheWrite {
        self.interceptor.on_after_response(exchange)
    }

    pub fn in_flight(&self) -> i64 {
        self.interceptor.in_flight()
    }

    pub fn filter_count(&self) -> usize {
        self.interceptor.filters().len()
    }

    pub fn store(&self) -> &CacheStore {
        self.interceptor.store()
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::CacheEntry;
    use crate::intercept::SkipReason;

    /// Exchange double. `run` fills `response` when the hooks leave it empty.
    #[derive(Default)]
    struct TestExchange {
        method: String,
        url: String,
        response: Option<CacheEntry>,
        served_from_cache: bool,
        fetched: bool,
    }

    impl TestExchange {
        fn new(method: &str, url: &str) -> Self {
            Self { method: method.into(), url: url.into(), ..Default::default() }
        }

        /// Run the exchange through both hooks, hitting the "network" when needed.
        fn run(controller: &InterceptionController, method: &str, url: &str, body: &str) -> (Self, Lookup, CacheWrite) {
            let mut ex = Self::new(method, url);
            let lookup = controller.on_before_request(&mut ex);
            if ex.response.is_none() {
                ex.fetched = true;
                ex.response = Some(CacheEntry::new(200, "OK").with_body(body));
            }
            let write = controller.on_after_response(&ex);
            (ex, lookup, write)
        }
    }

    impl Exchange for TestExchange {
        fn method(&self) -> &str {
            &self.method
        }

        fn full_url(&self) -> &str {
            &self.url
        }

        fn respond_with(&mut self, response: CacheEntry) {
            self.response = Some(response);
        }

        fn response(&self) -> Option<&CacheEntry> {
            self.response.as_ref()
        }

        fn served_from_cache(&self) -> bool {
            self.served_from_cache
        }

        fn set_served_from_cache(&mut self, served: bool) {
            self.served_from_cache = served;
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    #[async_trait]
    impl ProxyEngine for RecordingEngine {
        async fn start(&self, _hooks: Arc<dyn InterceptionHooks>) -> Result<(), Error> {
            if self.fail_start {
                return Err(Error::Transport("address in use".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), Error> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(dir: &tempfile::TempDir) -> (InterceptionController, Arc<RecordingEngine>) {
        let engine = Arc::new(RecordingEngine::default());
        let controller =
            InterceptionController::new(CacheKeyResolver::default(), CacheStore::new(dir.path()), engine.clone());
        (controller, engine)
    }

    #[test]
    fn test_miss_then_store() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload("GET https://a/.*").unwrap();

        let (ex, lookup, write) = TestExchange::run(&controller, "GET", "https://a/x?private_token=1", "v1");
        assert!(matches!(lookup, Lookup::Miss(_)));
        assert!(ex.fetched);

        let CacheWrite::Stored(key) = write else { panic!("expected store") };
        assert!(controller.store().exists(&key));
        assert_eq!(key.normalized_url(), "https://a/x");
    }

    #[test]
    fn test_hit_is_not_recached() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload("GET https://a/.*").unwrap();

        TestExchange::run(&controller, "GET", "https://a/x", "v1");
        let (ex, lookup, write) = TestExchange::run(&controller, "GET", "https://a/x#again", "v2");

        assert!(matches!(lookup, Lookup::Hit(_)));
        assert!(!ex.fetched);
        assert!(ex.served_from_cache);
        assert_eq!(ex.response.unwrap().body, b"v1");
        assert!(matches!(write, CacheWrite::Skipped(SkipReason::ServedFromCache)));
    }

    #[test]
    fn test_unmatched_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload("GET https://a/.*").unwrap();

        for (method, url) in [("POST", "https://a/x"), ("GET", "https://b/x"), ("CONNECT", "a:443")] {
            let (ex, lookup, write) = TestExchange::run(&controller, method, url, "v");
            assert!(matches!(lookup, Lookup::Bypassed));
            assert!(ex.fetched);
            assert!(matches!(write, CacheWrite::Skipped(SkipReason::NotMatched)));
        }
        assert_eq!(controller.store().entry_count(), 0);
    }

    #[test]
    fn test_no_rules_caches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);

        let (_, lookup, _) = TestExchange::run(&controller, "GET", "https://a/x", "v");
        assert!(matches!(lookup, Lookup::Bypassed));
        assert_eq!(controller.filter_count(), 0);
    }

    #[test]
    fn test_missing_response_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload(".*").unwrap();

        let mut ex = TestExchange::new("GET", "https://a/x");
        controller.on_before_request(&mut ex);
        let write = controller.on_after_response(&ex);
        assert!(matches!(write, CacheWrite::Skipped(SkipReason::NoResponse)));
    }

    #[test]
    fn test_corrupt_entry_is_reported_then_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload(".*").unwrap();

        let key = controller.interceptor().resolver().resolve("https://a/x");
        std::fs::write(controller.store().entry_path(&key), b"garbage").unwrap();

        let (ex, lookup, write) = TestExchange::run(&controller, "GET", "https://a/x", "fresh");
        assert!(matches!(lookup, Lookup::Failed(Error::CacheRead { .. })));
        assert!(ex.fetched);
        assert!(matches!(write, CacheWrite::Stored(_)));
        assert_eq!(controller.store().load(&key).unwrap().body, b"fresh");
    }

    #[test]
    fn test_write_failure_does_not_break_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let controller = InterceptionController::new(
            CacheKeyResolver::default(),
            CacheStore::new(&blocker),
            Arc::new(RecordingEngine::default()),
        );
        controller.reload(".*").unwrap();

        let (ex, _, write) = TestExchange::run(&controller, "GET", "https://a/x", "v");
        assert!(matches!(write, CacheWrite::Failed(Error::CacheWrite { .. })));
        assert_eq!(ex.response.unwrap().body, b"v");
    }

    #[test]
    fn test_invalid_reload_keeps_previous_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        assert_eq!(controller.reload("GET https://a/.*\nPOST https://b/.*").unwrap(), 2);

        let err = controller.reload("GET https://c/.*\nGET (").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { line: 2, .. }));

        assert_eq!(controller.filter_count(), 2);
        assert!(controller.interceptor().should_process("GET", "https://a/1"));
        assert!(!controller.interceptor().should_process("GET", "https://c/1"));
    }

    #[test]
    fn test_clear_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload(".*").unwrap();

        let (_, _, write) = TestExchange::run(&controller, "GET", "https://a/x", "v");
        let CacheWrite::Stored(key) = write else { panic!("expected store") };

        let summary = controller.clear_cache();
        assert_eq!(summary.removed, 1);
        assert!(!controller.store().exists(&key));

        let (ex, lookup, _) = TestExchange::run(&controller, "GET", "https://a/x", "v2");
        assert!(matches!(lookup, Lookup::Miss(_)));
        assert!(ex.fetched);
    }

    #[test]
    fn test_in_flight_counter() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);

        let mut a = TestExchange::new("GET", "https://a/");
        let mut b = TestExchange::new("GET", "https://b/");
        controller.on_before_request(&mut a);
        controller.on_before_request(&mut b);
        assert_eq!(controller.in_flight(), 2);

        controller.on_after_response(&a);
        assert_eq!(controller.in_flight(), 1);
        controller.on_after_response(&b);
        assert_eq!(controller.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_exchanges_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload(".*").unwrap();
        let controller = Arc::new(controller);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    let (ex, _, _) = TestExchange::run(&controller, "GET", "https://a/shared", &format!("body-{i}"));
                    ex.response.unwrap()
                })
            })
            .collect();

        for handle in handles {
            let response = handle.join().unwrap();
            assert!(String::from_utf8(response.body).unwrap().starts_with("body-"));
        }

        let key = controller.interceptor().resolver().resolve("https://a/shared");
        let stored = controller.store().load(&key).unwrap();
        assert!(String::from_utf8(stored.body).unwrap().starts_with("body-"));
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, engine) = controller(&dir);

        assert!(!controller.is_active());
        controller.stop().await.unwrap();
        assert_eq!(engine.stops.load(Ordering::SeqCst), 0);

        controller.start().await.unwrap();
        controller.start().await.unwrap();
        assert!(controller.is_active());
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);

        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
        assert!(!controller.is_active());
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine { fail_start: true, ..Default::default() });
        let controller = InterceptionController::new(CacheKeyResolver::default(), CacheStore::new(dir.path()), engine);

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_clear_cache_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        controller.reload(".*").unwrap();
        controller.start().await.unwrap();

        TestExchange::run(&controller, "GET", "https://a/x", "v");
        assert_eq!(controller.clear_cache().removed, 1);
        assert!(controller.is_active());
    }
}
