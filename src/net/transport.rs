//! Transport boundary: issues one HTTP exchange per call.
//!
//! The client core only depends on the [`Transport`] trait, so tests can
//! substitute scripted transports and the production implementation stays a
//! thin wrapper over reqwest.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CACHE_CONTROL};
use url::Url;

use super::endpoint::Method;
use super::error::{TransportError, TransportErrorKind};

/// One fully-resolved request, ready to be issued.
#[derive(Debug, Clone)]
pub struct RawRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Enforced per attempt; each retry gets a fresh window.
  pub timeout: Duration,
}

/// The other side of one successful exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
  pub status: u16,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl RawResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// The `Cache-Control` header value, if present and valid UTF-8.
  pub fn cache_control(&self) -> Option<&str> {
    self.headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok())
  }
}

/// Issues HTTP exchanges. Implementations must enforce the request timeout
/// and surface transport failures through [`TransportError`].
pub trait Transport {
  fn execute(
    &self,
    request: &RawRequest,
  ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Production transport backed by a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Transport for HttpTransport {
  async fn execute(&self, request: &RawRequest) -> Result<RawResponse, TransportError> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self
      .client
      .request(method, request.url.clone())
      .timeout(request.timeout);

    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(map_reqwest_error)?;

    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|e| {
      TransportError::new(
        TransportErrorKind::ConnectionLost,
        format!("failed to read response body: {}", e),
      )
    })?;

    Ok(RawResponse {
      status,
      headers,
      body,
    })
  }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
  let kind = if e.is_timeout() {
    TransportErrorKind::Timeout
  } else if e.is_connect() {
    connect_kind(&e)
  } else if e.is_body() || e.is_request() {
    TransportErrorKind::ConnectionLost
  } else {
    TransportErrorKind::Other
  };

  TransportError::new(kind, e.to_string())
}

/// Distinguish "no connectivity at all" from "can't reach that host" by
/// walking the source chain down to the underlying I/O error.
fn connect_kind(e: &reqwest::Error) -> TransportErrorKind {
  use std::error::Error as _;

  let mut source = e.source();
  while let Some(err) = source {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
      return match io.kind() {
        std::io::ErrorKind::NotConnected => TransportErrorKind::NotConnected,
        _ => TransportErrorKind::HostUnreachable,
      };
    }
    source = err.source();
  }

  TransportErrorKind::HostUnreachable
}
