use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;
use url::Url;

use super::{Method, Transport, TransportRequest, TransportResponse};
use crate::config::Config;
use crate::error::{ClientError, TransportError, CODE_ABORTED, CODE_CONNECT, CODE_TIMEOUT};

/// reqwest-backed transport with a pooled, keep-alive connection set.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  username: String,
  password: String,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self, ClientError> {
    let base_url = Url::parse(&config.url)
      .map_err(|e| ClientError::Config(format!("invalid url '{}': {}", config.url, e)))?;

    let mut builder = reqwest::Client::builder();
    builder = if config.connection.keep_alive {
      builder
        .pool_max_idle_per_host(config.max_idle_sockets())
        .tcp_keepalive(Some(Duration::from_secs(60)))
    } else {
      builder.pool_max_idle_per_host(0)
    };

    let client = builder
      .build()
      .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      username: config.username.clone(),
      password: config.password.clone(),
    })
  }

  async fn send_inner(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
    let url = self
      .base_url
      .join(&request.path)
      .map_err(|e| TransportError::new(format!("Invalid request path {}: {}", request.path, e)))?;

    let builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post => {
        let payload = serde_json::to_vec(&request.body)
          .map_err(|e| TransportError::new(format!("Failed to encode request body: {}", e)))?;
        self
          .client
          .post(url)
          .header(reqwest::header::CONTENT_TYPE, "application/json")
          .body(payload)
      }
    };

    let response = builder
      .basic_auth(&self.username, Some(&self.password))
      .timeout(request.timeout)
      .send()
      .await
      .map_err(classify)?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(classify)?;
    // Non-JSON bodies are kept as plain strings.
    let body = serde_json::from_slice::<Value>(&bytes)
      .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    trace!(status = status.as_u16(), "transport response");

    if status.is_success() {
      Ok(TransportResponse {
        status: status.as_u16(),
        body,
      })
    } else {
      Err(
        TransportError::with_status(
          status.as_u16(),
          format!("Request failed with status code {}", status.as_u16()),
        )
        .body(body),
      )
    }
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    Box::pin(self.send_inner(request))
  }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(err: reqwest::Error) -> TransportError {
  let message = err.to_string();
  if err.is_timeout() {
    TransportError::with_code(CODE_TIMEOUT, message)
  } else if err.is_connect() {
    TransportError::with_code(CODE_CONNECT, message)
  } else if err.is_body() || err.is_decode() {
    TransportError::with_code(CODE_ABORTED, message)
  } else if let Some(status) = err.status() {
    TransportError::with_status(status.as_u16(), message)
  } else {
    TransportError::new(message)
  }
}
