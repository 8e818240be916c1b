//! Scripted transport for tests.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Transport, TransportRequest, TransportResponse};
use crate::error::TransportError;

type Handler = dyn Fn(&TransportRequest, usize) -> Result<Value, TransportError> + Send + Sync;

/// Answers each request with `handler(request, call_index)`.
pub(crate) struct MockTransport {
  handler: Box<Handler>,
  delay: Duration,
  calls: AtomicUsize,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
  requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&TransportRequest, usize) -> Result<Value, TransportError> + Send + Sync + 'static,
  {
    Self {
      handler: Box::new(handler),
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
      in_flight: AtomicUsize::new(0),
      max_in_flight: AtomicUsize::new(0),
      requests: Mutex::new(Vec::new()),
    }
  }

  /// Always answer with `body`.
  pub fn ok(body: Value) -> Self {
    Self::new(move |_, _| Ok(body.clone()))
  }

  /// Hold every request for `delay` before answering.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<TransportRequest> {
    self.requests.lock().unwrap().clone()
  }
}

impl Transport for MockTransport {
  fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    Box::pin(async move {
      let index = self.calls.fetch_add(1, Ordering::SeqCst);
      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_in_flight.fetch_max(now, Ordering::SeqCst);
      self.requests.lock().unwrap().push(request.clone());

      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }

      let result = (self.handler)(&request, index);
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      result.map(|body| TransportResponse { status: 200, body })
    })
  }
}
