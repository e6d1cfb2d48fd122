//! Persisted response cache: the second tier behind the in-memory LRU.
//!
//! Stores raw response bodies keyed by request identity, along with enough
//! metadata (status, cache-control value, fetch time) to re-derive the
//! expiry decision on lookup. Survives process restarts.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

/// A response row as persisted, metadata included.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub body: Bytes,
  pub status: u16,
  /// Raw `Cache-Control` header value at fetch time, if any.
  pub cache_control: Option<String>,
  pub fetched_at: DateTime<Utc>,
}

/// Trait for persisted response cache backends.
pub trait ResponseStore: Send + Sync {
  /// Fetch the stored response for a request identity, if any.
  fn lookup(&self, key: &str) -> Result<Option<StoredResponse>>;

  /// Insert or replace the stored response for a request identity.
  fn store(&self, key: &str, response: &StoredResponse) -> Result<()>;

  /// Drop every stored response.
  fn clear(&self) -> Result<()>;
}

/// Store implementation that doesn't persist anything.
/// Used when the disk cache is disabled - all operations are no-ops.
pub struct NoopStore;

impl ResponseStore for NoopStore {
  fn lookup(&self, _key: &str) -> Result<Option<StoredResponse>> {
    Ok(None) // Always miss
  }

  fn store(&self, _key: &str, _response: &StoredResponse) -> Result<()> {
    Ok(()) // Discard
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-backed response store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    request_hash TEXT PRIMARY KEY,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    cache_control TEXT,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

impl SqliteStore {
  /// Create a new SQLite store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Create a store over an existing connection (in-memory in tests).
  pub fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pulselog").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// SHA256 hash for stable, fixed-length primary keys.
  fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl ResponseStore for SqliteStore {
  fn lookup(&self, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, u16, Option<String>, String)> = conn
      .query_row(
        "SELECT body, status, cache_control, fetched_at FROM response_cache
         WHERE request_hash = ?",
        params![Self::hash_key(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query response cache: {}", e))?;

    match row {
      Some((body, status, cache_control, fetched_at_str)) => {
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at_str)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse fetched_at '{}': {}", fetched_at_str, e))?;

        Ok(Some(StoredResponse {
          body: Bytes::from(body),
          status,
          cache_control,
          fetched_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn store(&self, key: &str, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (request_hash, request_key, status, cache_control, body, fetched_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          Self::hash_key(key),
          key,
          response.status,
          response.cache_control,
          response.body.as_ref(),
          response.fetched_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM response_cache", [])
      .map_err(|e| eyre!("Failed to clear response cache: {}", e))?;

    Ok(())
  }
}
