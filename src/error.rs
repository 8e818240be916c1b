//! Error taxonomy for transport and query failures.

use serde_json::Value;

/// Failure reported by a single transport send.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
  /// HTTP status, when the server answered at all
  pub status: Option<u16>,
  /// Low-level failure code (e.g. "timeout", "connect")
  pub code: Option<String>,
  pub message: String,
  /// Parsed error body returned by the server, if any
  pub body: Option<Value>,
}

pub const CODE_TIMEOUT: &str = "timeout";
pub const CODE_ABORTED: &str = "aborted";
pub const CODE_CONNECT: &str = "connect";

impl TransportError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      status: None,
      code: None,
      message: message.into(),
      body: None,
    }
  }

  pub fn with_status(status: u16, message: impl Into<String>) -> Self {
    Self {
      status: Some(status),
      ..Self::new(message)
    }
  }

  pub fn with_code(code: &str, message: impl Into<String>) -> Self {
    Self {
      code: Some(code.to_string()),
      ..Self::new(message)
    }
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Server-side errors and timeouts are worth another attempt; everything else is not.
  pub fn is_transient(&self) -> bool {
    if matches!(self.status, Some(s) if (500..600).contains(&s)) {
      return true;
    }
    matches!(self.code.as_deref(), Some(CODE_TIMEOUT) | Some(CODE_ABORTED))
  }

  /// Most specific message available: server `error`, then server `message`,
  /// then the transport message, then a generic fallback.
  pub fn detail(&self) -> String {
    let from_body = self.body.as_ref().and_then(|body| {
      ["error", "message"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .map(String::from)
    });

    from_body
      .or_else(|| Some(self.message.clone()).filter(|s| !s.is_empty()))
      .unwrap_or_else(|| "Unknown error".to_string())
  }
}

/// Errors surfaced to callers of the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
  #[error("query failed: {0}")]
  QueryFailed(String),
  #[error("serialization error: {0}")]
  Serialization(String),
  #[error("invalid configuration: {0}")]
  Config(String),
}

impl From<TransportError> for ClientError {
  fn from(err: TransportError) -> Self {
    Self::QueryFailed(err.detail())
  }
}

impl From<serde_json::Error> for ClientError {
  fn from(err: serde_json::Error) -> Self {
    Self::Serialization(err.to_string())
  }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
