//! On-disk response cache.
//!
//! - `key`: URL normalization and SHA-1 based file naming
//! - `entry`: stored responses and their HTTP/1.1 message encoding
//! - `store`: flat-directory store with atomic writes and per-key write locks
//!
//! There is no expiry, size bound or revalidation: entries live until cleared.

pub mod entry;
pub mod key;
pub mod store;


pub use entry::{CacheEntry, DecodeError};
pub use key::{CacheKey, CacheKeyResolver, DEFAULT_EXCLUDED_PARAMS, derive_key, normalize};
pub use store::{CacheStore, ClearSummary};
