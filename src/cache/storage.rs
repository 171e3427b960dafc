//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use url::Url;

use super::traits::CacheKey;

/// Trait for durable key/value cache backends.
///
/// All operations are synchronous and local.
pub trait CacheStore: Send + Sync {
  /// Replace the value stored under `key` and stamp
  /// [`CacheKey::LastFetchTime`] with the current time.
  fn put(&self, key: CacheKey, value: &str) -> Result<()>;

  /// Get the raw value stored under `key`.
  fn get(&self, key: CacheKey) -> Result<Option<String>>;

  /// Remove the value stored under `key`.
  fn clear(&self, key: CacheKey) -> Result<()>;

  /// Record `at` as the fetch time under `key`.
  fn mark_fetch_time_at(&self, key: CacheKey, at: DateTime<Utc>) -> Result<()>;

  /// Read the fetch time recorded under `key`.
  fn last_fetch_time(&self, key: CacheKey) -> Result<Option<DateTime<Utc>>>;

  /// Record the current time as the fetch time under `key`.
  fn mark_fetch_time(&self, key: CacheKey) -> Result<()> {
    self.mark_fetch_time_at(key, Utc::now())
  }

  /// Serialize `value` and store it as a whole under `key`.
  fn put_json<T: Serialize>(&self, key: CacheKey, value: &T) -> Result<()>
  where
    Self: Sized,
  {
    let data =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.put(key, &data)
  }

  /// Read and deserialize the value under `key`.
  ///
  /// A value that no longer deserializes is discarded and reported as a miss.
  fn get_json<T: DeserializeOwned>(&self, key: CacheKey) -> Result<Option<T>>
  where
    Self: Sized,
  {
    let Some(raw) = self.get(key)? else {
      return Ok(None);
    };

    match serde_json::from_str(&raw) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        warn!(key = %key, error = %e, "discarding malformed cache entry");
        self.clear(key)?;
        Ok(None)
      }
    }
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn put(&self, _key: CacheKey, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _key: CacheKey) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn clear(&self, _key: CacheKey) -> Result<()> {
    Ok(())
  }

  fn mark_fetch_time_at(&self, _key: CacheKey, _at: DateTime<Utc>) -> Result<()> {
    Ok(())
  }

  fn last_fetch_time(&self, _key: CacheKey) -> Result<Option<DateTime<Utc>>> {
    Ok(None) // Never fetched, so always stale
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open the cache scoped to the store at `origin`, under the data directory.
  pub fn open_for_origin(origin: &Url) -> Result<Self> {
    let path = Self::default_path(origin)?;
    Self::open(&path)
  }

  /// Open (or create) a cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A cache that lives only as long as the value.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path for a store origin.
  fn default_path(origin: &Url) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tdo").join(format!("cache-{}.db", origin_digest(origin))))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Short, stable digest of a URL's origin for file naming.
fn origin_digest(origin: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(origin.origin().ascii_serialization().as_bytes());
  hex::encode(hasher.finalize())[..16].to_string()
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO kv_cache (key, value, written_at) VALUES (?, ?, datetime('now'))",
      params![key, value],
    )
    .map_err(|e| eyre!("Failed to write cache entry {}: {}", key, e))?;
  Ok(())
}

impl CacheStore for SqliteStore {
  fn put(&self, key: CacheKey, value: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    write_value(&tx, key.as_str(), value)?;
    write_value(
      &tx,
      CacheKey::LastFetchTime.as_str(),
      &Utc::now().timestamp_millis().to_string(),
    )?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn get(&self, key: CacheKey) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT value FROM kv_cache WHERE key = ?",
        params![key.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))
  }

  fn clear(&self, key: CacheKey) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM kv_cache WHERE key = ?", params![key.as_str()])
      .map_err(|e| eyre!("Failed to clear cache entry {}: {}", key, e))?;
    Ok(())
  }

  fn mark_fetch_time_at(&self, key: CacheKey, at: DateTime<Utc>) -> Result<()> {
    let conn = self.lock()?;
    write_value(&conn, key.as_str(), &at.timestamp_millis().to_string())
  }

  fn last_fetch_time(&self, key: CacheKey) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = self.get(key)? else {
      return Ok(None);
    };

    let parsed = raw
      .trim()
      .parse::<i64>()
      .ok()
      .and_then(|millis| Utc.timestamp_millis_opt(millis).single());

    if parsed.is_none() {
      warn!(key = %key, value = %raw, "ignoring malformed fetch timestamp");
    }
    Ok(parsed)
  }
}
