//! Resilient remote-data access layer.
//!
//! This module provides the networking core of the application:
//! - Fetches resources over an unreliable network with per-attempt timeouts
//! - Serves repeated requests from a bounded in-memory LRU cache backed by
//!   a persisted SQLite response store
//! - Retries transient failures with exponential backoff
//! - Supports deterministic degradation (latency, failure rate) through an
//!   injectable network condition simulator

mod cache_control;
mod client;
mod endpoint;
mod error;
mod lru;
mod simulator;
mod store;
mod transport;

pub use cache_control::CacheEntry;
pub use client::ApiClient;
pub use endpoint::{CachePolicy, Endpoint, Method};
pub use error::{NetworkError, TransportError, TransportErrorKind};
pub use lru::LruCache;
pub use simulator::{FaultProfile, NetworkSimulator};
pub use store::{NoopStore, ResponseStore, SqliteStore, StoredResponse};
pub use transport::{HttpTransport, RawRequest, RawResponse, Transport};
