//! Client facade: one shared executor, with a request context per handle.

mod operations;

use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

use crate::batch::{self, BatchOptions, BatchResult, ParallelOptions, ParallelOutcome};
use crate::cache::{CacheStats, CacheStore};
use crate::config::Config;
use crate::error::ClientResult;
use crate::executor::{ExecuteOptions, Executor, Response};
use crate::transport::{HttpTransport, Transport};

pub use operations::{Condition, ConditionOperator, ParallelOperation, SearchType};

/// Per-handle values threaded into every request built by this handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
  /// Logical schema used when a call does not name one
  pub schema: String,
}

/// Client for the remote store.
///
/// Cloning is cheap and clones share the executor, cache and connection
/// pool. [`Client::with_schema`] hands out a clone with a different default
/// schema, so concurrent callers never race on a shared "current schema".
#[derive(Clone)]
pub struct Client {
  executor: Arc<Executor>,
  context: RequestContext,
  pool_size: usize,
}

impl Client {
  /// Connect over HTTP using `config`.
  pub fn new(config: &Config) -> ClientResult<Self> {
    config.validate()?;
    let transport = HttpTransport::new(config)?;
    Ok(Self::with_transport(config, Arc::new(transport)))
  }

  /// Build a client over any transport.
  pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
    let cache = CacheStore::shared(
      config.cache.max_size,
      std::time::Duration::from_millis(config.cache.sweep_interval_ms),
    );
    Self {
      executor: Arc::new(Executor::new(config, transport, cache)),
      context: RequestContext {
        schema: config.schema.clone(),
      },
      pool_size: config.pool_size,
    }
  }

  /// A handle whose calls default to `schema`. `self` is unaffected.
  pub fn with_schema(&self, schema: impl Into<String>) -> Self {
    Self {
      context: RequestContext {
        schema: schema.into(),
      },
      ..self.clone()
    }
  }

  pub fn schema(&self) -> &str {
    &self.context.schema
  }

  pub fn context(&self) -> &RequestContext {
    &self.context
  }

  /// Run a named operation with a raw body.
  pub async fn execute(
    &self,
    operation: &str,
    body: Map<String, Value>,
    options: &ExecuteOptions,
  ) -> ClientResult<Response> {
    self.executor.execute(operation, body, options).await
  }

  /// Drop cached reads of `table`, in `schema` or this handle's schema.
  pub fn invalidate_table(&self, table: &str, schema: Option<&str>) -> usize {
    self
      .executor
      .cache()
      .invalidate(table, schema.unwrap_or(&self.context.schema))
  }

  pub fn clear_cache(&self) {
    self.executor.cache().clear();
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.executor.cache().stats()
  }

  /// Batch defaults: 1000 records per group, configured pool size per wave.
  pub fn batch_options(&self) -> BatchOptions {
    BatchOptions::default().concurrency(self.pool_size)
  }

  pub fn parallel_options(&self) -> ParallelOptions {
    ParallelOptions::default().concurrency(self.pool_size)
  }

  /// Drive `items` through `send_group` in waves. See [`batch::run_batched`].
  pub async fn run_batched<T, F, Fut>(&self, items: &[T], send_group: F, options: &BatchOptions) -> BatchResult
  where
    F: Fn(&[T]) -> Fut,
    Fut: Future<Output = ClientResult<Response>>,
  {
    batch::run_batched(items, send_group, options).await
  }

  /// Run `ops` through `run_one` with a bounded window. See [`batch::run_parallel`].
  pub async fn run_parallel<Op, F, Fut>(&self, ops: Vec<Op>, run_one: F, options: &ParallelOptions) -> ParallelOutcome
  where
    F: FnMut(Op) -> Fut,
    Fut: Future<Output = ClientResult<Response>>,
  {
    batch::run_parallel(ops, run_one, options).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::mock::MockTransport;
  use serde_json::json;
  use std::time::Duration;

  #[tokio::test]
  async fn test_with_schema_does_not_leak() {
    let transport = Arc::new(MockTransport::ok(json!([])));
    let config = Config::new("http://localhost:9925", "admin", "pw");
    let base = Client::with_transport(&config, transport.clone());
    let prod = base.with_schema("prod");

    let (a, b) = tokio::join!(base.describe_schema(None), prod.describe_schema(None));
    a.unwrap();
    b.unwrap();

    assert_eq!(base.schema(), "dev");
    assert_eq!(prod.schema(), "prod");
    let mut schemas: Vec<String> = transport
      .requests()
      .iter()
      .map(|r| r.body["schema"].as_str().unwrap().to_string())
      .collect();
    schemas.sort();
    assert_eq!(schemas, vec!["dev", "prod"]);
  }

  #[tokio::test]
  async fn test_new_rejects_invalid_config() {
    let config = Config::new("http://localhost:9925", "", "pw");
    assert!(Client::new(&config).is_err());
  }

  #[tokio::test]
  async fn test_invalidate_table_uses_handle_schema() {
    let transport = Arc::new(MockTransport::ok(json!([])));
    let mut config = Config::new("http://localhost:9925", "admin", "pw");
    config.cache.enabled = true;
    let client = Client::with_transport(&config, transport.clone()).with_schema("prod");

    client.describe_table("dog").await.unwrap();
    assert_eq!(client.cache_stats().entries, 1);
    assert_eq!(client.with_schema("dev").invalidate_table("dog", None), 0);
    assert_eq!(client.invalidate_table("dog", None), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_parallel_bounds_requests_in_flight() {
    let transport = Arc::new(MockTransport::ok(json!([])).with_delay(Duration::from_millis(20)));
    let mut config = Config::new("http://localhost:9925", "admin", "pw");
    config.pool_size = 3;
    let client = Client::with_transport(&config, transport.clone());

    let tables: Vec<String> = (0..8).map(|n| format!("t{n}")).collect();
    let result = client
      .run_parallel(
        tables,
        |table| {
          let client = client.clone();
          async move { client.describe_table(&table).await }
        },
        &client.parallel_options(),
      )
      .await
      .into_result()
      .unwrap();

    assert_eq!(result.successful, 8);
    assert_eq!(transport.calls(), 8);
    assert_eq!(transport.max_in_flight(), 3);
  }
}
