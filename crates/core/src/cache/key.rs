//! Cache key derivation.
//!
//! A request URL is normalized (fragment dropped, excluded query parameters removed)
//! and hashed with SHA-1. The on-disk file name is a sanitized, truncated copy of the
//! normalized URL followed by `_` and the hex digest, so truncation never costs
//! uniqueness.
//!
//! Host and path are compared byte for byte: URLs differing only in letter case produce
//! distinct entries.

use std::fmt;

use sha1::{Digest, Sha1};

/// Query parameters removed before hashing unless configured otherwise.
pub const DEFAULT_EXCLUDED_PARAMS: &[&str] = &["private_token"];

/// Extension of cache entry files.
pub const CACHE_FILE_EXTENSION: &str = "cache";

/// Maximum number of characters kept from the normalized URL in a file name.
pub const MAX_READABLE_PREFIX: usize = 50;

/// Characters that are not portable in a path component.
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Identity of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    normalized_url: String,
    digest: String,
    file_name: String,
}

impl CacheKey {
    pub fn normalized_url(&self) -> &str {
        &self.normalized_url
    }

    /// Lowercase hex SHA-1 of the normalized URL.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Path component used for the entry file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// Turns request URLs into cache keys.
#[derive(Debug, Clone)]
pub struct CacheKeyResolver {
    excluded_params: Vec<String>,
}

impl Default for CacheKeyResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_PARAMS.iter().map(|p| p.to_string()))
    }
}

impl CacheKeyResolver {
    pub fn new(excluded_params: impl IntoIterator<Item = String>) -> Self {
        Self { excluded_params: excluded_params.into_iter().collect() }
    }

    pub fn excluded_params(&self) -> &[String] {
        &self.excluded_params
    }

    /// Normalize and hash a full request URL.
    pub fn resolve(&self, url: &str) -> CacheKey {
        derive_key(normalize(url, &self.excluded_params))
    }
}

/// Normalize a URL for caching.
///
/// Drops the fragment, removes query parameters whose key case-insensitively equals an
/// excluded name, and groups repeated keys (compared case-insensitively) at the position
/// of their first occurrence.
/// Kept pairs are copied verbatim (no re-encoding). Everything before `?` is untouched.
pub fn normalize<S: AsRef<str>>(url: &str, excluded_params: &[S]) -> String {
    let url = url.split_once('#').map_or(url, |(before, _)| before);

    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    // key (decoded, for comparison) -> raw pairs, in first-seen order
    let mut groups: Vec<(String, Vec<&str>)> = Vec::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let raw_key = pair.split_once('=').map_or(pair, |(k, _)| k);
        let key = decode_component(raw_key);

        if excluded_params.iter().any(|e| e.as_ref().eq_ignore_ascii_case(&key)) {
            continue;
        }

        match groups.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some((_, pairs)) => pairs.push(pair),
            None => groups.push((key, vec![pair])),
        }
    }

    if groups.is_empty() {
        return base.to_string();
    }

    let query = groups
        .iter()
        .flat_map(|(_, pairs)| pairs.iter().copied())
        .collect::<Vec<_>>()
        .join("&");

    format!("{base}?{query}")
}

/// Hash a normalized URL and build its file name.
pub fn derive_key(normalized_url: String) -> CacheKey {
    let digest = hex::encode(Sha1::digest(normalized_url.as_bytes()));

    let readable: String = normalized_url
        .chars()
        .filter(|c| !c.is_control() && !INVALID_FILE_NAME_CHARS.contains(c))
        .take(MAX_READABLE_PREFIX)
        .collect();

    let file_name = format!("{readable}_{digest}.{CACHE_FILE_EXTENSION}");

    CacheKey { normalized_url, digest, file_name }
}

/// Percent- and plus-decode a query key for comparison purposes.
fn decode_component(raw: &str) -> String {
    url::form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}
