//! Resilient API client: two cache tiers, retry with exponential backoff,
//! and injectable fault simulation.
//!
//! Request flow for a cacheable GET: memory LRU first, then the persisted
//! store (promoting hits back into memory), then the network attempt loop.
//! Identical concurrent requests are not coalesced: both will miss and both
//! will hit the network, which keeps side-effect timing observable.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::cache_control::{self, CacheEntry};
use super::endpoint::{CachePolicy, Endpoint, Method};
use super::error::NetworkError;
use super::lru::LruCache;
use super::simulator::NetworkSimulator;
use super::store::{ResponseStore, SqliteStore, StoredResponse};
use super::transport::{HttpTransport, RawRequest, RawResponse, Transport};

/// Default capacity of the in-memory response cache.
const MEMORY_CACHE_CAPACITY: usize = 150;

/// Base delay for exponential backoff; attempt n waits `0.3 * 2^n` seconds.
const BACKOFF_BASE_SECS: f64 = 0.3;

/// HTTP client with transparent two-tier caching and retry support.
pub struct ApiClient<T: Transport = HttpTransport, S: ResponseStore = SqliteStore> {
  base_url: Url,
  transport: T,
  store: S,
  memory_cache: LruCache<String, CacheEntry>,
  simulator: Arc<NetworkSimulator>,
}

impl ApiClient {
  /// Create a production client with the default transport and persisted
  /// store.
  pub fn new(base_url: Url, simulator: Arc<NetworkSimulator>) -> color_eyre::Result<Self> {
    let store = SqliteStore::open()?;
    Ok(Self::with_parts(
      base_url,
      HttpTransport::new(),
      store,
      simulator,
      MEMORY_CACHE_CAPACITY,
    ))
  }
}

impl<T: Transport, S: ResponseStore> ApiClient<T, S> {
  /// Assemble a client from explicit parts. Used by tests and by callers
  /// that want a different store or memory capacity.
  pub fn with_parts(
    base_url: Url,
    transport: T,
    store: S,
    simulator: Arc<NetworkSimulator>,
    memory_capacity: usize,
  ) -> Self {
    Self {
      base_url,
      transport,
      store,
      memory_cache: LruCache::new(memory_capacity),
      simulator,
    }
  }

  /// Fetch and decode a JSON response into `D`.
  ///
  /// Decode failures are surfaced as [`NetworkError::Decode`] and are never
  /// retried: a malformed payload won't improve on a second attempt.
  pub async fn request<D: DeserializeOwned>(
    &self,
    endpoint: &impl Endpoint,
  ) -> Result<D, NetworkError> {
    let data = self.request_data(endpoint).await?;
    serde_json::from_slice(&data).map_err(NetworkError::Decode)
  }

  /// Fetch the raw response body for an endpoint.
  pub async fn request_data(&self, endpoint: &impl Endpoint) -> Result<Bytes, NetworkError> {
    let request = self.make_request(endpoint)?;
    let cache_key = format!("{}:{}", request.method.as_str(), request.url);

    let cache_served =
      request.method == Method::Get && endpoint.cache_policy() == CachePolicy::UseCache;

    if cache_served {
      if let Some(entry) = self.memory_cache.get(&cache_key) {
        if !entry.is_expired() {
          debug!(url = %request.url, "memory cache hit");
          return Ok(entry.body);
        }
      }

      match self.store.lookup(&cache_key) {
        Ok(Some(stored)) => {
          let expiry =
            cache_control::expiry_from(stored.cache_control.as_deref(), stored.fetched_at);
          let entry = CacheEntry::new(stored.body, expiry);
          if !entry.is_expired() {
            debug!(url = %request.url, "persisted cache hit");
            self.memory_cache.set(cache_key.clone(), entry.clone());
            return Ok(entry.body);
          }
        }
        Ok(None) => {}
        Err(e) => warn!(url = %request.url, "persisted cache lookup failed: {e:#}"),
      }
    }

    let retry_budget = endpoint.retry_budget();
    let mut last_error = None;

    for attempt in 0..=retry_budget {
      match self.attempt(&request).await {
        Ok(response) => {
          if request.method == Method::Get {
            self.populate_caches(&cache_key, &response);
          }
          return Ok(response.body);
        }
        Err(error) => {
          let should_retry = attempt < retry_budget && error.is_retryable();
          if !should_retry {
            return Err(error);
          }

          let delay = Duration::from_secs_f64(BACKOFF_BASE_SECS * f64::powi(2.0, attempt as i32));
          debug!(
            url = %request.url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "attempt failed ({error}), backing off"
          );
          tokio::time::sleep(delay).await;
          last_error = Some(error);
        }
      }
    }

    Err(last_error.unwrap_or(NetworkError::InvalidResponse))
  }

  /// Drop every entry in the in-memory tier. The persisted tier is
  /// unaffected.
  pub fn clear_memory_cache(&self) {
    self.memory_cache.clear();
  }

  /// Drop every cached response in both tiers.
  pub fn clear_caches(&self) -> color_eyre::Result<()> {
    self.clear_memory_cache();
    self.store.clear()
  }

  /// One network attempt: simulator first, then the transport, then status
  /// classification.
  async fn attempt(&self, request: &RawRequest) -> Result<RawResponse, NetworkError> {
    self.simulator.apply_if_needed().await?;

    debug!(method = request.method.as_str(), url = %request.url, "HTTP request");
    let response = self.transport.execute(request).await?;
    debug!(status = response.status, bytes = response.body.len(), "HTTP response");

    if !response.is_success() {
      return Err(NetworkError::HttpStatus {
        status: response.status,
        body: response.body,
      });
    }

    Ok(response)
  }

  /// Populate both cache tiers from a successful GET response, honoring
  /// cache-control directives. A persisted-store write failure is logged
  /// and swallowed; it never fails the fetch itself.
  fn populate_caches(&self, cache_key: &str, response: &RawResponse) {
    let cache_control = response.cache_control();
    if !cache_control::should_store(cache_control) {
      return;
    }

    let now = Utc::now();
    let expiry = cache_control::expiry_from(cache_control, now);

    self
      .memory_cache
      .set(cache_key.to_string(), CacheEntry::new(response.body.clone(), expiry));

    let stored = StoredResponse {
      body: response.body.clone(),
      status: response.status,
      cache_control: cache_control.map(String::from),
      fetched_at: now,
    };
    if let Err(e) = self.store.store(cache_key, &stored) {
      warn!(key = cache_key, "failed to persist response: {e:#}");
    }
  }

  /// Resolve an endpoint against the base URL into a concrete request.
  fn make_request(&self, endpoint: &impl Endpoint) -> Result<RawRequest, NetworkError> {
    let mut url = self
      .base_url
      .join(&endpoint.path())
      .map_err(|_| NetworkError::InvalidUrl)?;

    let query = endpoint.query();
    if !query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    Ok(RawRequest {
      method: endpoint.method(),
      url,
      headers: endpoint.headers(),
      body: endpoint.body(),
      timeout: endpoint.timeout(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::error::{TransportError, TransportErrorKind};
  use crate::net::store::NoopStore;
  use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL};
  use rusqlite::Connection;
  use serde::Deserialize;
  use std::sync::atomic::{AtomicUsize, Ordering};

  // ==========================================================================
  // Test endpoints and transports
  // ==========================================================================

  struct TestEndpoint {
    path: String,
    method: Method,
    policy: CachePolicy,
    budget: u32,
  }

  impl TestEndpoint {
    fn get(path: &str) -> Self {
      Self {
        path: path.to_string(),
        method: Method::Get,
        policy: CachePolicy::UseCache,
        budget: 2,
      }
    }

    fn with_budget(mut self, budget: u32) -> Self {
      self.budget = budget;
      self
    }

    fn with_policy(mut self, policy: CachePolicy) -> Self {
      self.policy = policy;
      self
    }

    fn with_method(mut self, method: Method) -> Self {
      self.method = method;
      self
    }
  }

  impl Endpoint for TestEndpoint {
    fn path(&self) -> String {
      self.path.clone()
    }

    fn method(&self) -> Method {
      self.method
    }

    fn cache_policy(&self) -> CachePolicy {
      self.policy
    }

    fn retry_budget(&self) -> u32 {
      self.budget
    }
  }

  fn response(status: u16, body: &str, cache_control: Option<&str>) -> RawResponse {
    let mut headers = HeaderMap::new();
    if let Some(value) = cache_control {
      headers.insert(CACHE_CONTROL, HeaderValue::from_str(value).expect("header"));
    }
    RawResponse {
      status,
      headers,
      body: Bytes::copy_from_slice(body.as_bytes()),
    }
  }

  /// Returns the same response for every call, counting attempts.
  struct FixedTransport {
    response: RawResponse,
    calls: AtomicUsize,
  }

  impl FixedTransport {
    fn new(response: RawResponse) -> Self {
      Self {
        response,
        calls: AtomicUsize::new(0),
      }
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl Transport for &FixedTransport {
    async fn execute(&self, _request: &RawRequest) -> Result<RawResponse, TransportError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.response.clone())
    }
  }

  /// Fails with a timeout for the first `failures` calls, then succeeds.
  struct FlakyTransport {
    failures: usize,
    response: RawResponse,
    calls: AtomicUsize,
  }

  impl Transport for &FlakyTransport {
    async fn execute(&self, _request: &RawRequest) -> Result<RawResponse, TransportError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      if call < self.failures {
        Err(TransportError::new(TransportErrorKind::Timeout, "deadline elapsed"))
      } else {
        Ok(self.response.clone())
      }
    }
  }

  fn base_url() -> Url {
    Url::parse("https://api.example.com").expect("base url")
  }

  fn client<T: Transport>(transport: T) -> ApiClient<T, NoopStore> {
    ApiClient::with_parts(
      base_url(),
      transport,
      NoopStore,
      Arc::new(NetworkSimulator::new()),
      16,
    )
  }

  fn sqlite_store() -> SqliteStore {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    SqliteStore::with_connection(conn).expect("migrations")
  }

  // ==========================================================================
  // Retry and backoff
  // ==========================================================================

  #[tokio::test(start_paused = true)]
  async fn test_retry_budget_exhaustion_on_503() {
    let transport = FixedTransport::new(response(503, "unavailable", None));
    let client = client(&transport);

    let err = client
      .request_data(&TestEndpoint::get("v1/items").with_budget(2))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::HttpStatus { status: 503, .. }));
    // retry_budget 2 means 3 total attempts.
    assert_eq!(transport.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_backoff_delays_are_exact() {
    let transport = FixedTransport::new(response(503, "", None));
    let client = client(&transport);

    let start = tokio::time::Instant::now();
    let _ = client
      .request_data(&TestEndpoint::get("v1/items").with_budget(3))
      .await;

    // Waits after attempts 0, 1, 2: 0.3s + 0.6s + 1.2s.
    assert_eq!(start.elapsed(), Duration::from_millis(300 + 600 + 1200));
    assert_eq!(transport.calls(), 4);
  }

  #[tokio::test]
  async fn test_4xx_fails_without_retry() {
    let transport = FixedTransport::new(response(404, "missing", None));
    let client = client(&transport);

    let err = client
      .request_data(&TestEndpoint::get("v1/items"))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::HttpStatus { status: 404, .. }));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_http_status_error_carries_body() {
    let transport = FixedTransport::new(response(400, "bad field", None));
    let client = client(&transport);

    match client.request_data(&TestEndpoint::get("v1/items")).await {
      Err(NetworkError::HttpStatus { status, body }) => {
        assert_eq!(status, 400);
        assert_eq!(body.as_ref(), b"bad field");
      }
      other => panic!("expected http status error, got {:?}", other.map(|b| b.len())),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_timeouts_recover() {
    let transport = FlakyTransport {
      failures: 2,
      response: response(200, "ok", None),
      calls: AtomicUsize::new(0),
    };
    let client = client(&transport);

    let body = client
      .request_data(&TestEndpoint::get("v1/items").with_budget(2))
      .await
      .expect("third attempt succeeds");

    assert_eq!(body.as_ref(), b"ok");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_zero_budget_fails_on_first_transient_error() {
    let transport = FlakyTransport {
      failures: 1,
      response: response(200, "ok", None),
      calls: AtomicUsize::new(0),
    };
    let client = client(&transport);

    let err = client
      .request_data(&TestEndpoint::get("v1/items").with_budget(0))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::Transport(_)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
  }

  // ==========================================================================
  // Fault injection
  // ==========================================================================

  #[tokio::test(start_paused = true)]
  async fn test_simulated_failure_exhausts_budget() {
    let transport = FixedTransport::new(response(200, "ok", None));
    let simulator = Arc::new(NetworkSimulator::new());
    simulator.configure(true, 0, 1.0);

    let client = ApiClient::with_parts(base_url(), &transport, NoopStore, simulator, 16);

    let err = client
      .request_data(&TestEndpoint::get("v1/items").with_budget(2))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::Simulated));
    // The simulator fails every attempt before it reaches the transport.
    assert_eq!(transport.calls(), 0);
  }

  // ==========================================================================
  // Cache behavior
  // ==========================================================================

  #[tokio::test]
  async fn test_memory_cache_hit_skips_network() {
    let transport = FixedTransport::new(response(200, "payload", Some("max-age=60")));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items");

    let first = client.request_data(&endpoint).await.expect("network fetch");
    let second = client.request_data(&endpoint).await.expect("cache hit");

    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_uncapped_entries_never_expire() {
    // No cache-control directive at all: cached without an expiry.
    let transport = FixedTransport::new(response(200, "payload", None));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items");

    client.request_data(&endpoint).await.expect("fetch");
    client.request_data(&endpoint).await.expect("cache hit");
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_no_store_is_never_cached() {
    let transport = FixedTransport::new(response(200, "payload", Some("no-store, max-age=60")));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items");

    client.request_data(&endpoint).await.expect("fetch");
    client.request_data(&endpoint).await.expect("fetch again");
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_no_cache_is_stored_but_expired() {
    let transport = FixedTransport::new(response(200, "payload", Some("no-cache")));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items");

    client.request_data(&endpoint).await.expect("fetch");
    // The entry exists in the memory tier but is already expired, so the
    // next read goes back to the network.
    assert_eq!(client.memory_cache.len(), 1);
    client.request_data(&endpoint).await.expect("refetch");
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_max_age_zero_always_refetches() {
    let transport = FixedTransport::new(response(200, "payload", Some("max-age=0")));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items");

    client.request_data(&endpoint).await.expect("fetch");
    client.request_data(&endpoint).await.expect("refetch");
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_non_get_is_never_cache_served_or_populated() {
    let transport = FixedTransport::new(response(200, "created", Some("max-age=60")));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items").with_method(Method::Post);

    client.request_data(&endpoint).await.expect("post");
    client.request_data(&endpoint).await.expect("post again");

    assert_eq!(transport.calls(), 2);
    assert!(client.memory_cache.is_empty());
  }

  #[tokio::test]
  async fn test_reload_policy_bypasses_cache_but_still_populates() {
    let transport = FixedTransport::new(response(200, "payload", Some("max-age=60")));
    let client = client(&transport);

    let reload = TestEndpoint::get("v1/items").with_policy(CachePolicy::Reload);
    client.request_data(&reload).await.expect("fetch");
    client.request_data(&reload).await.expect("forced refetch");
    assert_eq!(transport.calls(), 2);

    // A default-policy request for the same resource is now a cache hit.
    let cached = TestEndpoint::get("v1/items");
    client.request_data(&cached).await.expect("cache hit");
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_query_parameters_are_part_of_request_identity() {
    struct PagedEndpoint {
      page: u32,
    }

    impl Endpoint for PagedEndpoint {
      fn path(&self) -> String {
        "v1/items".to_string()
      }

      fn query(&self) -> Vec<(String, String)> {
        vec![("page".to_string(), self.page.to_string())]
      }
    }

    let transport = FixedTransport::new(response(200, "payload", Some("max-age=60")));
    let client = client(&transport);

    client.request_data(&PagedEndpoint { page: 1 }).await.expect("page 1");
    client.request_data(&PagedEndpoint { page: 2 }).await.expect("page 2");
    client.request_data(&PagedEndpoint { page: 1 }).await.expect("page 1 cached");

    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_persisted_hit_promotes_into_memory() {
    let transport = FixedTransport::new(response(503, "down", None));
    let store = sqlite_store();

    // Seed the persisted tier as a previous process run would have.
    let key = "GET:https://api.example.com/v1/items";
    store
      .store(
        key,
        &StoredResponse {
          body: Bytes::from_static(b"persisted"),
          status: 200,
          cache_control: Some("max-age=3600".to_string()),
          fetched_at: Utc::now(),
        },
      )
      .expect("seed store");

    let client = ApiClient::with_parts(
      base_url(),
      &transport,
      store,
      Arc::new(NetworkSimulator::new()),
      16,
    );

    let body = client
      .request_data(&TestEndpoint::get("v1/items"))
      .await
      .expect("served from persisted tier");

    assert_eq!(body.as_ref(), b"persisted");
    assert_eq!(transport.calls(), 0);
    assert_eq!(client.memory_cache.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_persisted_entry_goes_to_network() {
    let transport = FixedTransport::new(response(200, "fresh", None));
    let store = sqlite_store();

    let key = "GET:https://api.example.com/v1/items";
    store
      .store(
        key,
        &StoredResponse {
          body: Bytes::from_static(b"stale"),
          status: 200,
          cache_control: Some("max-age=60".to_string()),
          fetched_at: Utc::now() - chrono::Duration::seconds(120),
        },
      )
      .expect("seed store");

    let client = ApiClient::with_parts(
      base_url(),
      &transport,
      store,
      Arc::new(NetworkSimulator::new()),
      16,
    );

    let body = client
      .request_data(&TestEndpoint::get("v1/items"))
      .await
      .expect("network fetch");

    assert_eq!(body.as_ref(), b"fresh");
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_clear_memory_cache_forces_refetch() {
    let transport = FixedTransport::new(response(200, "payload", None));
    let client = client(&transport);
    let endpoint = TestEndpoint::get("v1/items");

    client.request_data(&endpoint).await.expect("fetch");
    client.clear_memory_cache();
    client.request_data(&endpoint).await.expect("refetch");

    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_clear_caches_purges_both_tiers() {
    let transport = FixedTransport::new(response(200, "payload", Some("max-age=3600")));
    let client = ApiClient::with_parts(
      base_url(),
      &transport,
      sqlite_store(),
      Arc::new(NetworkSimulator::new()),
      16,
    );
    let endpoint = TestEndpoint::get("v1/items");

    client.request_data(&endpoint).await.expect("fetch");
    client.request_data(&endpoint).await.expect("cache hit");
    assert_eq!(transport.calls(), 1);

    client.clear_caches().expect("clear");

    // Neither the memory tier nor the persisted tier can serve now.
    client.request_data(&endpoint).await.expect("refetch");
    assert_eq!(transport.calls(), 2);
  }

  // ==========================================================================
  // Decoding and request construction
  // ==========================================================================

  #[derive(Debug, Deserialize, PartialEq)]
  struct Item {
    id: u32,
    name: String,
  }

  #[tokio::test]
  async fn test_typed_request_decodes_json() {
    let transport = FixedTransport::new(response(200, r#"{"id":7,"name":"squat"}"#, None));
    let client = client(&transport);

    let item: Item = client
      .request(&TestEndpoint::get("v1/items/7"))
      .await
      .expect("decoded");

    assert_eq!(
      item,
      Item {
        id: 7,
        name: "squat".to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_decode_failure_is_not_retried() {
    let transport = FixedTransport::new(response(200, "not json", None));
    let client = client(&transport);

    let err = client
      .request::<Item>(&TestEndpoint::get("v1/items/7"))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::Decode(_)));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_invalid_url_fails_immediately() {
    let transport = FixedTransport::new(response(200, "ok", None));
    let client = client(&transport);

    // An absolute path with a malformed host cannot be resolved.
    let err = client
      .request_data(&TestEndpoint::get("https://["))
      .await
      .unwrap_err();

    assert!(matches!(err, NetworkError::InvalidUrl));
    assert_eq!(transport.calls(), 0);
  }
}
