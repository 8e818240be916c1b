//! Single-operation execution: cache lookup, retried send, normalisation, cache fill.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::cache::{fingerprint, CacheStore};
use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::retry::RetryPolicy;
use crate::transport::{Method, Transport, TransportRequest};

const DEFAULT_MESSAGE: &str = "Query executed successfully";

/// Result of one logical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub message: String,
  pub data: Value,
  pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
  /// Wall time of the network call that produced the data, in milliseconds
  #[serde(rename = "executionTime")]
  pub execution_time_ms: u64,
  pub cached: bool,
}

impl Response {
  pub fn new(message: impl Into<String>, data: Value, execution_time_ms: u64) -> Self {
    Self {
      message: message.into(),
      data,
      metadata: ResponseMetadata {
        execution_time_ms,
        cached: false,
      },
    }
  }

  /// Build an envelope from whatever shape the server answered with.
  ///
  /// Arrays are the data; objects with a `data` field are unwrapped; anything
  /// else passes through untouched.
  pub fn from_raw(raw: Value, execution_time_ms: u64) -> Self {
    let message = raw
      .get("message")
      .and_then(Value::as_str)
      .unwrap_or(DEFAULT_MESSAGE)
      .to_string();

    let data = match raw {
      Value::Array(_) => raw,
      Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
      other => other,
    };

    Self::new(message, data, execution_time_ms)
  }
}

/// Per-call overrides of the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
  pub timeout: Option<Duration>,
  pub use_cache: Option<bool>,
  pub cache_ttl: Option<Duration>,
}

impl ExecuteOptions {
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn use_cache(mut self, use_cache: bool) -> Self {
    self.use_cache = Some(use_cache);
    self
  }

  pub fn cache_ttl(mut self, ttl: Duration) -> Self {
    self.cache_ttl = Some(ttl);
    self
  }
}

/// Answers one operation through cache, retry policy and transport.
///
/// The executor never invalidates the cache; callers that write do that
/// once the write has succeeded.
pub struct Executor {
  transport: Arc<dyn Transport>,
  cache: Arc<CacheStore>,
  retry: RetryPolicy,
  timeout: Duration,
  cache_enabled: bool,
  cache_ttl: Duration,
}

impl Executor {
  pub fn new(config: &Config, transport: Arc<dyn Transport>, cache: Arc<CacheStore>) -> Self {
    Self {
      transport,
      cache,
      retry: RetryPolicy::from_config(config),
      timeout: config.timeout(),
      cache_enabled: config.cache.enabled,
      cache_ttl: config.cache_ttl(),
    }
  }

  pub fn cache(&self) -> &Arc<CacheStore> {
    &self.cache
  }

  #[instrument(level = "debug", skip(self, body, options))]
  pub async fn execute(
    &self,
    operation: &str,
    body: Map<String, Value>,
    options: &ExecuteOptions,
  ) -> ClientResult<Response> {
    let use_cache = options.use_cache.unwrap_or(self.cache_enabled);
    let key = if use_cache {
      fingerprint(operation, &body)
    } else {
      String::new()
    };

    if let Some(entry) = self.cache.get(&key) {
      debug!("cache hit");
      let mut response = entry.payload;
      response.metadata.cached = true;
      return Ok(response);
    }

    let mut payload = body;
    payload.insert("operation".to_string(), Value::String(operation.to_string()));
    let request = TransportRequest {
      method: Method::Post,
      path: "/".to_string(),
      body: Value::Object(payload),
      timeout: options.timeout.unwrap_or(self.timeout),
    };

    let started = Instant::now();
    let raw = self
      .retry
      .run(|| self.transport.send(request.clone()))
      .await
      .map_err(|err| {
        debug!(error = %err, status = ?err.status, "operation failed");
        ClientError::from(err)
      })?;
    let elapsed = started.elapsed().as_millis() as u64;

    let response = Response::from_raw(raw.body, elapsed);
    debug!(elapsed_ms = elapsed, "operation complete");

    if !key.is_empty() {
      let ttl = options.cache_ttl.unwrap_or(self.cache_ttl);
      self.cache.put(&key, response.clone(), ttl);
    }

    Ok(response)
  }
}
