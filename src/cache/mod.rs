//! Response caching for read operations.
//!
//! This module provides:
//! - Content-addressed keys derived from the operation and a canonical request body
//! - A bounded store with TTL expiry and oldest-first eviction
//! - Invalidation by table/schema after writes made through this client
//! - A background sweep so never-read entries don't accumulate

pub mod fingerprint;
mod store;

pub use fingerprint::{fingerprint, is_cacheable};
pub use store::{CacheEntry, CacheStats, CacheStore};
