//! Forward proxy engine driving the interception hooks.
//!
//! One request per connection. Plain HTTP exchanges go through both hooks and may be
//! answered from cache; CONNECT requests are tunnelled byte for byte, so HTTPS traffic
//! is relayed but never cached.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use httpcache_core::{AppConfig, CacheEntry, ConfigError, Error, Exchange, InterceptionHooks, ProxyEngine};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::ProxyError;
use crate::exchange::ProxyExchange;
use crate::request::{self, RequestHead};
use crate::upstream::UpstreamClient;

/// Response headers replaced when a response is written to the client.
const REWRITTEN_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection", "keep-alive"];

/// Backoff after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Idle connections that never send a complete head are closed after this long.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the proxy engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address to listen on (default: 127.0.0.1:8877)
    pub listen_addr: SocketAddr,

    /// Upstream request timeout (default: 30s)
    pub upstream_timeout: Duration,

    /// Maximum request or response body size in bytes (default: 50MB)
    pub max_body_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8877)),
            upstream_timeout: Duration::from_secs(30),
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            listen_addr: config.socket_addr()?,
            upstream_timeout: config.upstream_timeout(),
            max_body_bytes: config.max_body_bytes,
        })
    }
}

/// Hooks shared by every connection task of one run.
///
/// Hook calls hold the read lock for their whole duration, so once [`HookSlot::clear`]
/// returns no hook is running and none will run again.
#[derive(Clone)]
struct HookSlot(Arc<RwLock<Option<Arc<dyn InterceptionHooks>>>>);

impl HookSlot {
    fn new(hooks: Arc<dyn InterceptionHooks>) -> Self {
        Self(Arc::new(RwLock::new(Some(hooks))))
    }

    /// Run `before_request` on a blocking thread. Skipped once cleared.
    async fn before_request(&self, mut exchange: ProxyExchange) -> Result<ProxyExchange, ProxyError> {
        let slot = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(hooks) = slot.0.blocking_read().as_ref() {
                hooks.before_request(&mut exchange);
            }
            exchange
        })
        .await
        .map_err(|e| ProxyError::Hook(e.to_string()))
    }

    /// Run `after_response` on a blocking thread. Skipped once cleared.
    async fn after_response(&self, exchange: ProxyExchange) -> Result<(), ProxyError> {
        let slot = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(hooks) = slot.0.blocking_read().as_ref() {
                hooks.after_response(&exchange);
            }
        })
        .await
        .map_err(|e| ProxyError::Hook(e.to_string()))
    }

    /// Uninstall the hooks, waiting for calls already in progress.
    async fn clear(&self) {
        self.0.write().await.take();
    }
}

struct Running {
    local_addr: SocketAddr,
    hooks: HookSlot,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Plain HTTP forward proxy implementing [`ProxyEngine`].
pub struct HttpProxyEngine {
    config: EngineConfig,
    running: Mutex<Option<Running>>,
}

impl HttpProxyEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, running: Mutex::new(None) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bound address while running. Differs from the configured one when port 0 was used.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }
}

#[async_trait]
impl ProxyEngine for HttpProxyEngine {
    async fn start(&self, hooks: Arc<dyn InterceptionHooks>) -> Result<(), Error> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ProxyError::AlreadyRunning.into());
        }

        let upstream = Arc::new(UpstreamClient::new(self.config.upstream_timeout, self.config.max_body_bytes)?);

        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ProxyError::from)?;

        let hooks = HookSlot::new(hooks);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let max_body_bytes = self.config.max_body_bytes;
        let task = tokio::spawn(accept_loop(listener, hooks.clone(), upstream, max_body_bytes, shutdown_rx));

        tracing::info!(%local_addr, "proxy listening");
        *running = Some(Running { local_addr, hooks, shutdown, task });

        Ok(())
    }

    /// Uninstall the hooks, then close the listener and every open connection.
    async fn stop(&self) -> Result<(), Error> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.hooks.clear().await;

        let _ = running.shutdown.send(true);
        running
            .task
            .await
            .map_err(|e| Error::Transport(format!("accept loop failed: {e}")))?;

        tracing::info!(local_addr = %running.local_addr, "proxy closed");
        Ok(())
    }
}

/// Accept connections until shutdown, then abort the connection tasks still open.
async fn accept_loop(
    listener: TcpListener, hooks: HookSlot, upstream: Arc<UpstreamClient>, max_body_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hooks = hooks.clone();
                    let upstream = Arc::clone(&upstream);
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(stream, hooks, upstream, max_body_bytes).await {
                            tracing::debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    let open = connections.len();
    connections.shutdown().await;
    tracing::debug!(open, "connections closed");
}

async fn serve_connection(
    stream: TcpStream, hooks: HookSlot, upstream: Arc<UpstreamClient>, max_body_bytes: usize,
) -> Result<(), ProxyError> {
    let mut reader = BufReader::new(stream);

    let head = match tokio::time::timeout(HEAD_READ_TIMEOUT, request::read_head(&mut reader)).await {
        Ok(Ok(Some(head))) => head,
        Ok(Ok(None)) | Err(_) => return Ok(()),
        Ok(Err(e)) => return reject(reader.get_mut(), e, false).await,
    };

    if head.is_connect() {
        return tunnel(reader, head, hooks).await;
    }

    let head_request = head.is_head();
    let (url, body) = match read_request(&mut reader, &head, max_body_bytes).await {
        Ok(parts) => parts,
        Err(e) => return reject(reader.get_mut(), e, head_request).await,
    };
    let mut client = reader.into_inner();

    let mut exchange = hooks.before_request(ProxyExchange::new(head, url, body)).await?;

    let mut upstream_err = None;
    if !exchange.served_from_cache() && exchange.response().is_none() {
        match upstream.forward(&exchange).await {
            Ok(response) => exchange.set_response(response),
            Err(e) => {
                tracing::warn!(url = exchange.full_url(), error = %e, "upstream fetch failed");
                upstream_err = Some(e);
            }
        }
    }

    let written = match (exchange.response(), &upstream_err) {
        (Some(response), _) => write_response(&mut client, response, head_request).await,
        (None, Some(e)) => write_error(&mut client, e, head_request).await,
        (None, None) => write_error(&mut client, &ProxyError::Upstream("no response".into()), head_request).await,
    };

    hooks.after_response(exchange).await?;
    written
}

async fn read_request(
    reader: &mut BufReader<TcpStream>, head: &RequestHead, max_body_bytes: usize,
) -> Result<(String, Bytes), ProxyError> {
    let url = head.full_url()?;

    if head.is_chunked() {
        return Err(ProxyError::UnsupportedTransferEncoding);
    }

    let len = head.content_length()?;
    if len > max_body_bytes {
        return Err(ProxyError::BodyTooLarge { size: len, limit: max_body_bytes });
    }

    let body = request::read_body(reader, len).await?;
    Ok((url, Bytes::from(body)))
}

/// Relay a CONNECT tunnel. The hooks still see the exchange, but no filter matches it.
async fn tunnel(reader: BufReader<TcpStream>, head: RequestHead, hooks: HookSlot) -> Result<(), ProxyError> {
    let target = head.target.clone();
    let exchange = hooks.before_request(ProxyExchange::new(head, target.clone(), Bytes::new())).await?;

    let buffered = reader.buffer().to_vec();
    let mut client = reader.into_inner();
    let result = splice(&mut client, &target, &buffered).await;

    hooks.after_response(exchange).await?;
    result
}

async fn splice(client: &mut TcpStream, target: &str, buffered: &[u8]) -> Result<(), ProxyError> {
    let mut upstream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            let err = ProxyError::Upstream(format!("connect {target}: {e}"));
            write_error(client, &err, false).await?;
            return Err(err);
        }
    };

    client.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;
    if !buffered.is_empty() {
        upstream.write_all(buffered).await?;
    }

    let (sent, received) = tokio::io::copy_bidirectional(client, &mut upstream).await?;
    tracing::debug!(target, sent, received, "tunnel closed");
    Ok(())
}

/// Write an error response, then hand the error back to the caller.
async fn reject<W>(writer: &mut W, err: ProxyError, head_request: bool) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    write_error(writer, &err, head_request).await?;
    Err(err)
}

async fn write_error<W>(writer: &mut W, err: &ProxyError, head_request: bool) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let (status, reason) = err.status();
    let response = CacheEntry::new(status, reason)
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .with_body(err.to_string());
    write_response(writer, &response, head_request).await
}

/// Serialize a response for a client that will see the connection close afterwards.
///
/// 1xx, 204 and 304 responses carry no body and no `Content-Length`. A response to HEAD
/// keeps the origin's `Content-Length` and carries no body. Everything else is framed by
/// the stored body's length.
pub(crate) async fn write_response<W>(writer: &mut W, response: &CacheEntry, head_request: bool) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let bodiless = matches!(response.status, 100..=199 | 204 | 304);
    let keep_stored_length = head_request && !bodiless;
    let send_body = !head_request && !bodiless;

    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, response.reason);
    for (name, value) in &response.headers {
        let is_length = name.eq_ignore_ascii_case("content-length");
        if (is_length && !keep_stored_length) || REWRITTEN_RESPONSE_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if send_body {
        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    writer.write_all(head.as_bytes()).await?;
    if send_body {
        writer.write_all(&response.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use httpcache_core::{CacheKeyResolver, CacheStore, InterceptionController};
    use tokio::io::AsyncReadExt;

    use super::*;

    fn test_config() -> EngineConfig {
        EngineConfig { listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)), ..Default::default() }
    }

    /// Origin server answering every request with `hit N`.
    async fn spawn_origin() -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let _ = stream.read(&mut buf).await;
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let body = format!("hit {n}");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (addr, hits)
    }

    async fn wait_for_entries(store: &CacheStore, count: usize) {
        for _ in 0..100 {
            if store.entry_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("cache never reached {count} entries");
    }

    #[tokio::test]
    async fn test_write_response_rewrites_framing() {
        let response = CacheEntry::new(200, "OK")
            .with_header("Transfer-Encoding", "chunked")
            .with_header("Content-Length", "999")
            .with_header("X-Kept", "yes")
            .with_body("hello");

        let mut out = Vec::new();
        write_response(&mut out, &response, false).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK\r\nX-Kept: yes\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello"
        );
    }

    #[tokio::test]
    async fn test_write_response_to_head_keeps_origin_length() {
        let response = CacheEntry::new(200, "OK").with_header("Content-Length", "1234");

        let mut out = Vec::new();
        write_response(&mut out, &response, true).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Length: 1234\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_write_response_bodiless_status_has_no_length() {
        for status in [101, 204, 304] {
            let response = CacheEntry::new(status, "X").with_header("Content-Length", "7").with_body("ignored");

            let mut out = Vec::new();
            write_response(&mut out, &response, false).await.unwrap();
            assert_eq!(
                String::from_utf8(out).unwrap(),
                format!("HTTP/1.1 {status} X\r\nConnection: close\r\n\r\n")
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_closes_open_connections_without_running_hooks() {
        let (origin, hits) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(HttpProxyEngine::new(test_config()));
        let controller =
            InterceptionController::new(CacheKeyResolver::default(), CacheStore::new(dir.path()), engine.clone());
        controller.reload(".*").unwrap();
        controller.start().await.unwrap();

        let proxy_addr = engine.local_addr().await.unwrap();
        let mut idle = TcpStream::connect(proxy_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        controller.stop().await.unwrap();
        assert!(!controller.is_active());

        let request = format!("GET http://{origin}/after-stop HTTP/1.1\r\nHost: {origin}\r\n\r\n");
        let _ = idle.write_all(request.as_bytes()).await;
        let mut response = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), idle.read_to_string(&mut response)).await;
        assert!(read.is_ok(), "connection left open after stop");

        assert!(!response.starts_with("HTTP/1.1 200"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(controller.store().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_from_app_config() {
        let config = AppConfig { listen_addr: "127.0.0.1:9999".into(), max_body_bytes: 10, ..Default::default() };
        let engine_config = EngineConfig::from_app_config(&config).unwrap();
        assert_eq!(engine_config.listen_addr.port(), 9999);
        assert_eq!(engine_config.max_body_bytes, 10);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let engine = HttpProxyEngine::new(test_config());
        let dir = tempfile::tempdir().unwrap();
        let hooks: Arc<dyn InterceptionHooks> =
            Arc::new(httpcache_core::Interceptor::new(CacheKeyResolver::default(), CacheStore::new(dir.path())));

        engine.start(Arc::clone(&hooks)).await.unwrap();
        assert!(engine.local_addr().await.is_some());
        let err = engine.start(hooks).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert!(engine.local_addr().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_request_served_from_cache() {
        let (origin, hits) = spawn_origin().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(HttpProxyEngine::new(test_config()));
        let controller =
            InterceptionController::new(CacheKeyResolver::default(), CacheStore::new(dir.path()), engine.clone());
        controller.reload("GET http://127\\.0\\.0\\.1:\\d+/cached.*").unwrap();
        controller.start().await.unwrap();

        let proxy_addr = engine.local_addr().await.unwrap();
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{proxy_addr}")).unwrap())
            .build()
            .unwrap();

        let first = client
            .get(format!("http://{origin}/cached?private_token=one"))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);
        assert_eq!(first.text().await.unwrap(), "hit 1");
        wait_for_entries(controller.store(), 1).await;

        let second = client
            .get(format!("http://{origin}/cached?private_token=two"))
            .send()
            .await
            .unwrap();
        assert_eq!(second.text().await.unwrap(), "hit 1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        for expected in ["hit 2", "hit 3"] {
            let live = client.get(format!("http://{origin}/live")).send().await.unwrap();
            assert_eq!(live.text().await.unwrap(), expected);
        }
        assert_eq!(controller.store().entry_count(), 1);

        controller.stop().await.unwrap();
        assert!(!controller.is_active());
        assert!(engine.local_addr().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = unused.local_addr().unwrap();
        drop(unused);

        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(HttpProxyEngine::new(test_config()));
        let controller =
            InterceptionController::new(CacheKeyResolver::default(), CacheStore::new(dir.path()), engine.clone());
        controller.reload(".*").unwrap();
        controller.start().await.unwrap();

        let proxy_addr = engine.local_addr().await.unwrap();
        let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
        let request = format!("GET http://{dead_addr}/x HTTP/1.1\r\nHost: {dead_addr}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));

        controller.stop().await.unwrap();
        assert_eq!(controller.store().entry_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_malformed_request_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = HttpProxyEngine::new(test_config());
        let hooks: Arc<dyn InterceptionHooks> =
            Arc::new(httpcache_core::Interceptor::new(CacheKeyResolver::default(), CacheStore::new(dir.path())));
        engine.start(hooks).await.unwrap();

        let proxy_addr = engine.local_addr().await.unwrap();
        let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
        stream.write_all(b"NONSENSE\r\n\r\n").await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        engine.stop().await.unwrap();
    }
}
