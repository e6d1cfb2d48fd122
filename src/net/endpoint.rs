//! Endpoint descriptors: the immutable description of one request.

use std::time::Duration;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

/// Whether a request may be served from / stored into the cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
  /// Honor cache-control semantics: serve fresh cached responses, store
  /// cacheable ones.
  #[default]
  UseCache,
  /// Skip both cache tiers and always hit the network.
  Reload,
}

/// Trait for types describing one logical API request.
///
/// Only `path` is required; the remaining methods have defaults that suit
/// most read-only endpoints. Implementations must not carry mutable state:
/// a descriptor may be read concurrently by any number of in-flight calls.
pub trait Endpoint {
  /// Path relative to the client's base URL (e.g., "api/v2/exercise/").
  fn path(&self) -> String;

  fn method(&self) -> Method {
    Method::Get
  }

  /// Query parameters appended to the resolved URL.
  fn query(&self) -> Vec<(String, String)> {
    Vec::new()
  }

  fn headers(&self) -> Vec<(String, String)> {
    Vec::new()
  }

  fn body(&self) -> Option<Vec<u8>> {
    None
  }

  fn cache_policy(&self) -> CachePolicy {
    CachePolicy::default()
  }

  /// Per-attempt timeout. Each retry gets a fresh window.
  fn timeout(&self) -> Duration {
    Duration::from_secs(30)
  }

  /// Additional attempts permitted after the first (so `retry_budget` + 1
  /// total attempts).
  fn retry_budget(&self) -> u32 {
    2
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Minimal;

  impl Endpoint for Minimal {
    fn path(&self) -> String {
      "api/v2/thing/".to_string()
    }
  }

  #[test]
  fn test_defaults() {
    let e = Minimal;
    assert_eq!(e.method(), Method::Get);
    assert!(e.query().is_empty());
    assert!(e.headers().is_empty());
    assert!(e.body().is_none());
    assert_eq!(e.cache_policy(), CachePolicy::UseCache);
    assert_eq!(e.timeout(), Duration::from_secs(30));
    assert_eq!(e.retry_budget(), 2);
  }

  #[test]
  fn test_method_strings() {
    assert_eq!(Method::Get.as_str(), "GET");
    assert_eq!(Method::Delete.as_str(), "DELETE");
  }
}
