//! Typed error taxonomy for the networking layer.

use bytes::Bytes;
use thiserror::Error;

/// Failure categories a transport implementation can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
  /// The per-attempt timeout elapsed before a response arrived.
  Timeout,
  /// An established connection dropped mid-exchange.
  ConnectionLost,
  /// No network connectivity at all.
  NotConnected,
  /// DNS resolution or routing to the host failed.
  HostUnreachable,
  /// Anything else (TLS errors, malformed redirects, ...).
  Other,
}

/// A transport-level failure: the exchange never produced an HTTP response.
#[derive(Debug, Error)]
#[error("transport error ({kind:?}): {message}")]
pub struct TransportError {
  pub kind: TransportErrorKind,
  pub message: String,
}

impl TransportError {
  pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  /// Transient failure kinds that are worth retrying.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self.kind,
      TransportErrorKind::Timeout
        | TransportErrorKind::ConnectionLost
        | TransportErrorKind::NotConnected
        | TransportErrorKind::HostUnreachable
    )
  }
}

/// Errors surfaced by [`ApiClient`](super::client::ApiClient).
///
/// Exactly one of these is returned per failed call.
#[derive(Debug, Error)]
pub enum NetworkError {
  /// The endpoint's path/query could not be resolved into a URL.
  #[error("the request URL is invalid")]
  InvalidUrl,

  /// The transport returned something not interpretable as an HTTP response.
  #[error("received an invalid server response")]
  InvalidResponse,

  /// The server answered with a non-2xx status. Carries the response body.
  #[error("server returned HTTP status {status}")]
  HttpStatus { status: u16, body: Bytes },

  /// The response body could not be decoded into the requested type.
  #[error("could not decode server response")]
  Decode(#[source] serde_json::Error),

  /// Failure injected by the network condition simulator.
  #[error("simulated network failure")]
  Simulated,

  /// The exchange failed below the HTTP layer.
  #[error(transparent)]
  Transport(#[from] TransportError),
}

impl NetworkError {
  /// Whether a retry could plausibly succeed.
  ///
  /// Server errors (5xx), simulated failures, and transient transport
  /// failures are retryable. Client errors, decode failures, and malformed
  /// requests are not.
  pub fn is_retryable(&self) -> bool {
    match self {
      NetworkError::Simulated => true,
      NetworkError::HttpStatus { status, .. } => *status >= 500,
      NetworkError::Transport(e) => e.is_retryable(),
      _ => false,
    }
  }
}
