//! Interpretation of `Cache-Control` response directives.
//!
//! Precedence: `no-store` forbids caching entirely; otherwise `no-cache`
//! wins over `max-age` and yields an already-expired entry (stored, but
//! never served fresh); otherwise `max-age=N` sets an expiry N seconds
//! after the response was received. No recognized directive means the
//! entry never expires by time.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

/// A cached response body together with its computed expiry.
///
/// Entries are immutable once created; cache tiers replace them wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub body: Bytes,
  /// When the entry stops being fresh. `None` means it never expires by
  /// time (only capacity eviction or an explicit clear removes it).
  pub expiry: Option<DateTime<Utc>>,
}

impl CacheEntry {
  pub fn new(body: Bytes, expiry: Option<DateTime<Utc>>) -> Self {
    Self { body, expiry }
  }

  pub fn is_expired(&self) -> bool {
    match self.expiry {
      Some(expiry) => Utc::now() >= expiry,
      None => false,
    }
  }
}

/// Whether a response with these directives may be stored at all.
///
/// `no-store` takes precedence over every other directive.
pub fn should_store(cache_control: Option<&str>) -> bool {
  let Some(value) = cache_control else {
    return true;
  };
  !directives(value).any(|d| d.eq_ignore_ascii_case("no-store"))
}

/// Compute the expiry for a response received at `received_at`.
///
/// Returns `None` when no recognized directive applies, i.e. the entry
/// never goes stale on its own.
pub fn expiry_from(
  cache_control: Option<&str>,
  received_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
  let value = cache_control?;

  if directives(value).any(|d| d.eq_ignore_ascii_case("no-cache")) {
    // Cacheable but immediately stale: the next read must revalidate.
    return Some(received_at);
  }

  for directive in directives(value) {
    if let Some(seconds) = directive
      .to_ascii_lowercase()
      .strip_prefix("max-age=")
      .and_then(|s| s.trim().parse::<i64>().ok())
    {
      return Some(received_at + Duration::seconds(seconds));
    }
  }

  None
}

fn directives(value: &str) -> impl Iterator<Item = &str> {
  value.split(',').map(str::trim).filter(|d| !d.is_empty())
}
