//! The proxy's view of one request/response pair.

use bytes::Bytes;
use httpcache_core::{CacheEntry, Exchange};

use crate::request::RequestHead;

/// A proxied exchange handed to the interception hooks.
#[derive(Debug)]
pub struct ProxyExchange {
    head: RequestHead,
    url: String,
    body: Bytes,
    response: Option<CacheEntry>,
    served_from_cache: bool,
}

impl ProxyExchange {
    pub fn new(head: RequestHead, url: String, body: Bytes) -> Self {
        Self { head, url, body, response: None, served_from_cache: false }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Record the upstream response.
    pub fn set_response(&mut self, response: CacheEntry) {
        self.response = Some(response);
    }
}

impl Exchange for ProxyExchange {
    fn method(&self) -> &str {
        &self.head.method
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
