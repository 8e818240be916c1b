//! Concurrency-bounded execution of bulk writes and fan-out queries.
//!
//! Bulk jobs split records into fixed-size groups and send them in waves: up to
//! `concurrency` groups at once, and the next wave only starts once the current
//! one has fully settled. A failed group marks its records failed without
//! stopping the job. Parallel jobs keep a sliding window of `concurrency`
//! operations in flight and either settle every result or abort on the first
//! error, as the caller chooses.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::executor::Response;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CONCURRENCY: usize = 10;
const CANCELLED: &str = "batch cancelled";

#[derive(Debug, Clone)]
pub struct BatchOptions {
  /// Records per network request
  pub batch_size: usize,
  /// Groups in flight per wave
  pub concurrency: usize,
  /// Checked before each wave; a wave already dispatched always completes
  pub cancel: Option<CancellationToken>,
}

impl Default for BatchOptions {
  fn default() -> Self {
    Self {
      batch_size: DEFAULT_BATCH_SIZE,
      concurrency: DEFAULT_CONCURRENCY,
      cancel: None,
    }
  }
}

impl BatchOptions {
  pub fn batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  pub fn concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn cancel_on(mut self, token: CancellationToken) -> Self {
    self.cancel = Some(token);
    self
  }
}

/// A record that could not be written, by its position in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
  pub index: usize,
  pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
  pub successful: usize,
  pub failed: usize,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<BatchError>,
  #[serde(rename = "executionTime")]
  pub execution_time_ms: u64,
  /// Set when the job stopped early because its cancellation token fired
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub cancelled: bool,
}

impl BatchResult {
  pub fn is_complete_success(&self) -> bool {
    self.failed == 0
  }

  fn record_failure(&mut self, start: usize, len: usize, error: &str) {
    self.failed += len;
    self
      .errors
      .extend((start..start + len).map(|index| BatchError {
        index,
        error: error.to_string(),
      }));
  }
}

/// Send `items` in groups of `batch_size`, `concurrency` groups per wave.
///
/// Each group is one call to `send_group`. Never fails as a whole: group
/// failures are recorded per record with their original index.
pub async fn run_batched<T, F, Fut>(items: &[T], send_group: F, options: &BatchOptions) -> BatchResult
where
  F: Fn(&[T]) -> Fut,
  Fut: Future<Output = ClientResult<Response>>,
{
  let started = Instant::now();
  let batch_size = options.batch_size.max(1);
  let concurrency = options.concurrency.max(1);

  let groups: Vec<(usize, &[T])> = items
    .chunks(batch_size)
    .enumerate()
    .map(|(n, group)| (n * batch_size, group))
    .collect();

  let mut result = BatchResult::default();

  for (wave_no, wave) in groups.chunks(concurrency).enumerate() {
    if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
      let (start, _) = wave[0];
      warn!(wave = wave_no, remaining = items.len() - start, "batch cancelled");
      result.record_failure(start, items.len() - start, CANCELLED);
      result.cancelled = true;
      break;
    }

    debug!(wave = wave_no, groups = wave.len(), "dispatching wave");
    let outcomes = join_all(wave.iter().map(|&(start, group)| {
      let send = send_group(group);
      async move { (start, group.len(), send.await) }
    }))
    .await;

    for (start, len, outcome) in outcomes {
      match outcome {
        Ok(_) => result.successful += len,
        Err(err) => {
          let message = failure_message(&err);
          debug!(start, len, error = %message, "group failed");
          result.record_failure(start, len, &message);
        }
      }
    }
  }

  result.errors.sort_by_key(|e| e.index);
  result.execution_time_ms = started.elapsed().as_millis() as u64;
  info!(
    successful = result.successful,
    failed = result.failed,
    elapsed_ms = result.execution_time_ms,
    "batch complete"
  );
  result
}

/// The detail of a query failure, without the "query failed:" prefix.
fn failure_message(err: &ClientError) -> String {
  match err {
    ClientError::QueryFailed(detail) => detail.clone(),
    other => other.to_string(),
  }
}

#[derive(Debug, Clone, Copy)]
pub struct ParallelOptions {
  pub concurrency: usize,
  /// Stop at the first failure instead of recording it
  pub fail_fast: bool,
}

impl Default for ParallelOptions {
  fn default() -> Self {
    Self {
      concurrency: DEFAULT_CONCURRENCY,
      fail_fast: false,
    }
  }
}

impl ParallelOptions {
  pub fn concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn fail_fast(mut self, fail_fast: bool) -> Self {
    self.fail_fast = fail_fast;
    self
  }
}

/// One operation's outcome within a parallel job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParallelItem {
  Ok(Response),
  Failed { error: String },
}

impl ParallelItem {
  pub fn is_ok(&self) -> bool {
    matches!(self, Self::Ok(_))
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParallelResult {
  /// In the same order as the submitted operations
  pub results: Vec<ParallelItem>,
  pub successful: usize,
  pub failed: usize,
  #[serde(rename = "executionTime")]
  pub execution_time_ms: u64,
}

/// How a parallel job ended.
#[derive(Debug, Clone)]
pub enum ParallelOutcome {
  /// Every operation ran; failures are recorded inline
  Settled(ParallelResult),
  /// Fail-fast job stopped at this error
  Aborted(ClientError),
}

impl ParallelOutcome {
  pub fn into_result(self) -> ClientResult<ParallelResult> {
    match self {
      Self::Settled(result) => Ok(result),
      Self::Aborted(err) => Err(err),
    }
  }
}

/// Run `ops` with at most `concurrency` in flight.
///
/// With `fail_fast`, the first error in input order stops new operations from
/// starting. Operations already sent still run to completion before the job
/// returns, so no write is cut off mid-request; their results are discarded.
pub async fn run_parallel<Op, F, Fut>(ops: Vec<Op>, run_one: F, options: &ParallelOptions) -> ParallelOutcome
where
  F: FnMut(Op) -> Fut,
  Fut: Future<Output = ClientResult<Response>>,
{
  let started = Instant::now();
  let total = ops.len();
  let aborting = AtomicBool::new(false);
  let pending = ops
    .into_iter()
    .take_while(|_| !aborting.load(Ordering::SeqCst))
    .map(run_one);
  let mut results = pin!(stream::iter(pending).buffered(options.concurrency.max(1)));
  let mut outcome = ParallelResult {
    results: Vec::with_capacity(total),
    ..Default::default()
  };
  let mut first_error = None;

  while let Some(item) = results.next().await {
    if first_error.is_some() {
      continue;
    }
    match item {
      Ok(response) => {
        outcome.successful += 1;
        outcome.results.push(ParallelItem::Ok(response));
      }
      Err(err) if options.fail_fast => {
        warn!(index = outcome.results.len(), error = %err, "parallel job aborting");
        aborting.store(true, Ordering::SeqCst);
        first_error = Some(err);
      }
      Err(err) => {
        outcome.failed += 1;
        outcome.results.push(ParallelItem::Failed {
          error: failure_message(&err),
        });
      }
    }
  }

  if let Some(err) = first_error {
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "operations in flight settled after abort");
    return ParallelOutcome::Aborted(err);
  }

  outcome.execution_time_ms = started.elapsed().as_millis() as u64;
  info!(
    successful = outcome.successful,
    failed = outcome.failed,
    elapsed_ms = outcome.execution_time_ms,
    "parallel job complete"
  );
  ParallelOutcome::Settled(outcome)
}
