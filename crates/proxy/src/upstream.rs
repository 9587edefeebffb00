//! Upstream fetches for exchanges that were not answered from cache.
//!
//! - No redirects are followed: the client sees what the origin sent
//! - No transparent decompression: bodies are relayed and cached as encoded
//! - Hop-by-hop and `Proxy-*` request headers are not forwarded
//! - Response bodies are bounded by `max_body_bytes`

use std::time::{Duration, Instant};

use httpcache_core::{CacheEntry, Exchange};
use reqwest::{Client, Method};

use crate::ProxyError;
use crate::exchange::ProxyExchange;

/// Request headers that only concern the client-to-proxy hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// HTTP client that forwards exchanges to their origin.
pub struct UpstreamClient {
    http: Client,
    max_body_bytes: usize,
}

impl UpstreamClient {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self, ProxyError> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .use_rustls_tls()
            .build()
            .map_err(|e| ProxyError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, max_body_bytes })
    }

    /// Send the exchange's request upstream and collect the full response.
    pub async fn forward(&self, exchange: &ProxyExchange) -> Result<CacheEntry, ProxyError> {
        let start = Instant::now();
        let head = exchange.head();

        let method = Method::from_bytes(head.method.as_bytes())
            .map_err(|_| ProxyError::MalformedRequest(format!("bad method: {}", head.method)))?;

        let mut request = self.http.request(method, exchange.full_url());
        for (name, value) in &head.headers {
            if is_forwardable(name) {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if !exchange.body().is_empty() {
            request = request.body(exchange.body().clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("network error: {e}")))?;

        if let Some(len) = response.content_length()
            && len as usize > self.max_body_bytes
        {
            return Err(ProxyError::BodyTooLarge { size: len as usize, limit: self.max_body_bytes });
        }

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(format!("failed to read response: {e}")))?;

        if bytes.len() > self.max_body_bytes {
            return Err(ProxyError::BodyTooLarge { size: bytes.len(), limit: self.max_body_bytes });
        }

        tracing::debug!(
            method = %head.method,
            url = exchange.full_url(),
            status = status.as_u16(),
            bytes = bytes.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "fetched from upstream"
        );

        Ok(CacheEntry {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: bytes.to_vec(),
        })
    }
}

fn is_forwardable(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) && !name.to_ascii_lowercase().starts_with("proxy-")
}
