//! Bounded in-memory response cache with TTL expiry.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::fingerprint;
use crate::executor::Response;

/// A cached response and when it stops being fresh.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub fingerprint: String,
  pub payload: Response,
  pub stored_at: Instant,
  pub ttl: Duration,
  /// Insertion sequence, used for oldest-first eviction
  seq: u64,
}

impl CacheEntry {
  fn is_expired(&self, now: Instant) -> bool {
    now.duration_since(self.stored_at) >= self.ttl
  }
}

/// Counters for cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub entries: usize,
}

#[derive(Default)]
struct Inner {
  entries: HashMap<String, CacheEntry>,
  /// Insertion order: seq -> key
  order: BTreeMap<u64, String>,
  next_seq: u64,
  hits: u64,
  misses: u64,
  evictions: u64,
}

impl Inner {
  fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    let entry = self.entries.remove(key)?;
    self.order.remove(&entry.seq);
    Some(entry)
  }

  fn evict_oldest(&mut self) {
    if let Some((_, key)) = self.order.pop_first() {
      self.entries.remove(&key);
      self.evictions += 1;
    }
  }

  fn remove_expired(&mut self, now: Instant) -> usize {
    let expired: Vec<String> = self
      .entries
      .values()
      .filter(|e| e.is_expired(now))
      .map(|e| e.fingerprint.clone())
      .collect();
    for key in &expired {
      self.remove(key);
    }
    expired.len()
  }
}

/// Response cache keyed by request fingerprint.
///
/// Eviction is by insertion order, not access recency. All reads and writes go
/// through a single mutex so overlapping requests can't corrupt the mapping.
pub struct CacheStore {
  inner: Mutex<Inner>,
  max_size: usize,
}

impl CacheStore {
  pub fn new(max_size: usize) -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
      max_size: max_size.max(1),
    }
  }

  /// Create a shared store and, if a tokio runtime is running, a background
  /// task that drops expired entries every `sweep_interval`. A zero interval
  /// disables the sweep.
  pub fn shared(max_size: usize, sweep_interval: Duration) -> Arc<Self> {
    let store = Arc::new(Self::new(max_size));
    if sweep_interval.is_zero() {
      return store;
    }
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
      handle.spawn(sweep_loop(Arc::downgrade(&store), sweep_interval));
    }
    store
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    // A panic while holding the lock leaves the map itself consistent.
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Fresh entry for `key`, if any. Expired entries are removed on the way.
  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    if key.is_empty() {
      return None;
    }
    let mut inner = self.lock();
    let now = Instant::now();

    let found = inner.entries.get(key).cloned();
    match found {
      Some(entry) if !entry.is_expired(now) => {
        inner.hits += 1;
        Some(entry)
      }
      Some(_) => {
        inner.remove(key);
        inner.misses += 1;
        None
      }
      None => {
        inner.misses += 1;
        None
      }
    }
  }

  /// Store a payload. Evicts the oldest-inserted entry when full.
  pub fn put(&self, key: &str, payload: Response, ttl: Duration) {
    if key.is_empty() {
      return;
    }
    let mut inner = self.lock();

    if inner.remove(key).is_none() && inner.entries.len() >= self.max_size {
      inner.evict_oldest();
    }

    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.order.insert(seq, key.to_string());
    inner.entries.insert(
      key.to_string(),
      CacheEntry {
        fingerprint: key.to_string(),
        payload,
        stored_at: Instant::now(),
        ttl,
        seq,
      },
    );
  }

  /// Remove every entry whose request named `table`, in `schema` or with no
  /// schema at all. Returns the number of entries removed.
  pub fn invalidate(&self, table: &str, schema: &str) -> usize {
    let mut inner = self.lock();

    let stale: Vec<String> = inner
      .entries
      .keys()
      .filter(|key| {
        let Some((_, body)) = fingerprint::decode(key) else {
          return false;
        };
        let names_table = body.get("table").and_then(Value::as_str) == Some(table);
        let schema_matches = match body.get("schema").and_then(Value::as_str) {
          Some(s) => s == schema,
          None => true,
        };
        names_table && schema_matches
      })
      .cloned()
      .collect();

    for key in &stale {
      inner.remove(key);
    }
    if !stale.is_empty() {
      debug!(table, schema, removed = stale.len(), "invalidated cache entries");
    }
    stale.len()
  }

  /// Remove every entry that belongs to `schema`, whatever the table.
  pub fn invalidate_schema(&self, schema: &str) -> usize {
    let mut inner = self.lock();

    let stale: Vec<String> = inner
      .entries
      .keys()
      .filter(|key| {
        fingerprint::decode(key)
          .and_then(|(_, body)| body.get("schema").and_then(Value::as_str).map(|s| s == schema))
          .unwrap_or(false)
      })
      .cloned()
      .collect();

    for key in &stale {
      inner.remove(key);
    }
    stale.len()
  }

  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.entries.clear();
    inner.order.clear();
  }

  /// Drop expired entries now.
  pub fn purge_expired(&self) -> usize {
    self.lock().remove_expired(Instant::now())
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    let inner = self.lock();
    CacheStats {
      hits: inner.hits,
      misses: inner.misses,
      evictions: inner.evictions,
      entries: inner.entries.len(),
    }
  }
}

async fn sweep_loop(store: Weak<CacheStore>, every: Duration) {
  let mut interval = tokio::time::interval(every);
  // First tick fires immediately.
  interval.tick().await;
  loop {
    interval.tick().await;
    let Some(store) = store.upgrade() else {
      break;
    };
    let removed = store.purge_expired();
    if removed > 0 {
      debug!(removed, "swept expired cache entries");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::fingerprint::fingerprint;
  use serde_json::{json, Map};

  fn response(data: Value) -> Response {
    Response::new("ok", data, 3)
  }

  fn key(operation: &str, body: Value) -> String {
    let body: Map<String, Value> = body.as_object().cloned().unwrap();
    fingerprint(operation, &body)
  }

  #[tokio::test(start_paused = true)]
  async fn test_ttl_expiry_boundary() {
    let store = CacheStore::new(10);
    let k = key("search_by_hash", json!({ "table": "dog", "hash_values": [1] }));
    store.put(&k, response(json!([1])), Duration::from_millis(100));

    tokio::time::advance(Duration::from_millis(99)).await;
    assert!(store.get(&k).is_some());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(store.get(&k).is_none());
    assert_eq!(store.len(), 0);
  }

  #[test]
  fn test_empty_key_is_never_stored() {
    let store = CacheStore::new(10);
    store.put("", response(json!(null)), Duration::from_secs(1));
    assert!(store.is_empty());
    assert!(store.get("").is_none());
  }

  #[tokio::test]
  async fn test_capacity_evicts_oldest_only() {
    let store = CacheStore::new(3);
    let keys: Vec<String> = (0..4)
      .map(|i| key("search_by_hash", json!({ "table": "dog", "hash_values": [i] })))
      .collect();

    for k in &keys[..3] {
      store.put(k, response(json!([])), Duration::from_secs(60));
    }
    // Reading the oldest does not protect it: eviction is by insertion.
    assert!(store.get(&keys[0]).is_some());

    store.put(&keys[3], response(json!([])), Duration::from_secs(60));
    assert_eq!(store.len(), 3);
    assert!(store.get(&keys[0]).is_none());
    assert!(store.get(&keys[1]).is_some());
    assert!(store.get(&keys[2]).is_some());
    assert!(store.get(&keys[3]).is_some());
    assert_eq!(store.stats().evictions, 1);
  }

  #[tokio::test]
  async fn test_overwrite_keeps_single_entry() {
    let store = CacheStore::new(2);
    let k = key("describe_all", json!({}));
    store.put(&k, response(json!(1)), Duration::from_secs(60));
    store.put(&k, response(json!(2)), Duration::from_secs(60));

    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&k).unwrap().payload.data, json!(2));
    assert_eq!(store.stats().evictions, 0);
  }

  #[tokio::test]
  async fn test_invalidation_scoping() {
    let store = CacheStore::new(10);
    let ttl = Duration::from_secs(60);
    let orders_dev = key("search_by_value", json!({ "schema": "dev", "table": "orders", "search_value": "x" }));
    let orders_bare = key("describe_table", json!({ "table": "orders" }));
    let orders_prod = key("search_by_value", json!({ "schema": "prod", "table": "orders", "search_value": "x" }));
    let users_dev = key("search_by_value", json!({ "schema": "dev", "table": "users", "search_value": "x" }));

    for k in [&orders_dev, &orders_bare, &orders_prod, &users_dev] {
      store.put(k, response(json!([])), ttl);
    }
    // Undecodable keys are skipped, not fatal.
    store.put("not-hex", response(json!([])), ttl);

    assert_eq!(store.invalidate("orders", "dev"), 2);
    assert!(store.get(&orders_dev).is_none());
    assert!(store.get(&orders_bare).is_none());
    assert!(store.get(&orders_prod).is_some());
    assert!(store.get(&users_dev).is_some());
    assert!(store.get("not-hex").is_some());
  }

  #[tokio::test]
  async fn test_invalidate_schema() {
    let store = CacheStore::new(10);
    let ttl = Duration::from_secs(60);
    let a = key("describe_schema", json!({ "schema": "dev" }));
    let b = key("describe_schema", json!({ "schema": "prod" }));
    store.put(&a, response(json!({})), ttl);
    store.put(&b, response(json!({})), ttl);

    assert_eq!(store.invalidate_schema("dev"), 1);
    assert!(store.get(&a).is_none());
    assert!(store.get(&b).is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_background_sweep_removes_unread_entries() {
    let store = CacheStore::shared(10, Duration::from_millis(50));
    let k = key("describe_all", json!({}));
    store.put(&k, response(json!({})), Duration::from_millis(10));
    assert_eq!(store.len(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store.len(), 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_overlapping_access_keeps_map_consistent() {
    let store = Arc::new(CacheStore::new(16));
    let ttl = Duration::from_secs(60);

    let writer = |table: &'static str| {
      let store = store.clone();
      tokio::spawn(async move {
        for i in 0..200 {
          let k = key("search_by_hash", json!({ "schema": "dev", "table": table, "hash_values": [i % 40] }));
          store.put(&k, response(json!([i])), ttl);
          store.get(&k);
          tokio::task::yield_now().await;
        }
      })
    };
    let invalidator = {
      let store = store.clone();
      tokio::spawn(async move {
        for _ in 0..100 {
          store.invalidate("dog", "dev");
          tokio::task::yield_now().await;
        }
      })
    };

    let (a, b, c) = tokio::join!(writer("dog"), writer("cat"), invalidator);
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert!(store.len() <= 16);
    let inner = store.lock();
    assert_eq!(inner.entries.len(), inner.order.len());
    for (seq, k) in &inner.order {
      assert_eq!(inner.entries.get(k).map(|e| e.seq), Some(*seq));
    }
  }

  #[tokio::test]
  async fn test_clear() {
    let store = CacheStore::new(10);
    store.put(&key("describe_all", json!({})), response(json!({})), Duration::from_secs(5));
    store.clear();
    assert!(store.is_empty());
  }
}
