//! Content-addressed cache keys.
//!
//! A key is the hex encoding of the canonical JSON form of `{operation, body}`.
//! Hex keeps the key map-safe while staying reversible, so invalidation can
//! decode a key and inspect the request body that produced it.

use serde_json::{Map, Value};

/// Operations whose responses may be cached.
const CACHEABLE_OPERATIONS: &[&str] = &[
  "search_by_hash",
  "search_by_id",
  "search_by_value",
  "search_by_conditions",
  "sql",
  "describe_table",
  "describe_schema",
  "describe_all",
];

/// Whether a request may be answered from cache.
pub fn is_cacheable(operation: &str, body: &Map<String, Value>) -> bool {
  if operation.starts_with("list_") {
    return true;
  }
  if !CACHEABLE_OPERATIONS.contains(&operation) {
    return false;
  }
  // Raw queries are only reads when they are SELECT statements.
  if operation == "sql" {
    return body
      .get("sql")
      .and_then(Value::as_str)
      .map(|sql| sql.trim_start().to_ascii_lowercase().starts_with("select"))
      .unwrap_or(false);
  }
  true
}

/// Compute the cache key for a request. Empty means "do not cache".
pub fn fingerprint(operation: &str, body: &Map<String, Value>) -> String {
  if !is_cacheable(operation, body) {
    return String::new();
  }

  let mut keyed = Map::new();
  keyed.insert("body".to_string(), canonicalize(&Value::Object(body.clone())));
  keyed.insert("operation".to_string(), Value::String(operation.to_string()));

  // Keys inserted in sorted order, so output is stable with or without `preserve_order`.
  hex::encode(Value::Object(keyed).to_string())
}

/// Decode a key back into its operation and body. `None` for anything malformed.
pub fn decode(key: &str) -> Option<(String, Map<String, Value>)> {
  let bytes = hex::decode(key).ok()?;
  let value: Value = serde_json::from_slice(&bytes).ok()?;
  let operation = value.get("operation")?.as_str()?.to_string();
  let body = value.get("body")?.as_object()?.clone();
  Some((operation, body))
}

/// Recursively rebuild a value with object keys sorted; arrays keep their order.
pub fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      let sorted: Map<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    other => other.clone(),
  }
}
