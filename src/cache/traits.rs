//! Core types for the caching system.

use chrono::{DateTime, Utc};
use std::fmt;

/// The fixed set of logical cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// Snapshot of the active (incomplete) task list
  ActiveTasks,
  /// Snapshot of the completed-task archive
  CompletedTasks,
  /// Shared timestamp of the last successful fetch
  LastFetchTime,
}

impl CacheKey {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheKey::ActiveTasks => "cached_todos",
      CacheKey::CompletedTasks => "cached_completed_todos",
      CacheKey::LastFetchTime => "last_fetch_time",
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Last successful fetch time (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a snapshot that is still fresh.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where a list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the remote store
  Network,
  /// Snapshot served because it was fresh enough
  Cache,
  /// Remote store unreachable, serving the last snapshot
  Offline,
}

impl CacheSource {
  pub fn is_degraded(&self) -> bool {
    matches!(self, CacheSource::Offline)
  }
}
