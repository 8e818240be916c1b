//! The network boundary: one request in, one status + body out.

mod http;
#[cfg(test)]
pub(crate) mod mock;

use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;

use crate::error::TransportError;

pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

/// A single outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
  pub method: Method,
  pub path: String,
  pub body: Value,
  pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
  pub status: u16,
  pub body: Value,
}

/// Sends requests to the remote store.
///
/// Implementations must allow many outstanding requests at once; the
/// executor shares one transport across every concurrent call.
pub trait Transport: Send + Sync {
  fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}
