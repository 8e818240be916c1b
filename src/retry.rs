//! Linear-backoff retry for transient transport failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempts allowed, including the first
  max_attempts: u32,
  base_delay: Duration,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      base_delay,
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.max_retries, config.retry_delay())
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// Delay before the attempt that follows attempt number `attempt` (1-based).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    self.base_delay * attempt
  }

  /// Run `send` until it succeeds, fails permanently, or the attempt budget is spent.
  pub async fn run<T, F, Fut>(&self, mut send: F) -> Result<T, TransportError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
  {
    let mut attempt = 0u32;
    loop {
      attempt += 1;
      match send().await {
        Ok(value) => return Ok(value),
        Err(err) if attempt < self.max_attempts && err.is_transient() => {
          let delay = self.delay_after(attempt);
          warn!(
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
          );
          tokio::time::sleep(delay).await;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use tokio::time::Instant;

  fn failing_then_ok(failures: u32, status: u16) -> (AtomicU32, impl Fn(u32) -> Result<&'static str, TransportError>) {
    let counter = AtomicU32::new(0);
    let respond = move |n: u32| {
      if n < failures {
        Err(TransportError::with_status(status, "unavailable"))
      } else {
        Ok("done")
      }
    };
    (counter, respond)
  }

  #[tokio::test(start_paused = true)]
  async fn test_recovers_within_budget() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100));
    let (calls, respond) = failing_then_ok(2, 503);
    let start = Instant::now();

    let result = policy
      .run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let out = respond(n);
        async move { out }
      })
      .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Two delays: 100ms then 200ms.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310));
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_budget_propagates_last_error() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100));
    let (calls, respond) = failing_then_ok(3, 503);

    let err = policy
      .run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let out = respond(n);
        async move { out }
      })
      .await
      .unwrap_err();

    assert_eq!(err.status, Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_client_error_is_not_retried() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100));
    let (calls, respond) = failing_then_ok(1, 400);
    let start = Instant::now();

    let err = policy
      .run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let out = respond(n);
        async move { out }
      })
      .await
      .unwrap_err();

    assert_eq!(err.status, Some(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_millis(1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeouts_are_retried() {
    let policy = RetryPolicy::new(2, Duration::from_millis(10));
    let calls = AtomicU32::new(0);

    let result = policy
      .run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            Err(TransportError::with_code(crate::error::CODE_TIMEOUT, "timed out"))
          } else {
            Ok(n)
          }
        }
      })
      .await;

    assert_eq!(result.unwrap(), 1);
  }

  #[test]
  fn test_zero_retries_still_attempts_once() {
    let policy = RetryPolicy::new(0, Duration::from_millis(10));
    assert_eq!(policy.max_attempts(), 1);
    assert_eq!(RetryPolicy::new(3, Duration::from_millis(10)).delay_after(3), Duration::from_millis(30));
  }
}
