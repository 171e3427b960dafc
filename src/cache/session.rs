//! Session identity and the staleness policy built on it.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

use super::storage::CacheStore;
use super::traits::CacheKey;

/// Volatile, process-scoped session marker.
///
/// The token is minted on first use and never persisted, so every process
/// starts a new session. Newness is tracked per cached list: the first read
/// of each list in a session is a new-session read.
#[derive(Debug, Default)]
pub struct Session {
  token: OnceLock<String>,
  seen: Mutex<HashSet<CacheKey>>,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns true exactly once per `key`: on its first read this session.
  pub fn is_new_for(&self, key: CacheKey) -> bool {
    self.token.get_or_init(mint_token);
    let mut seen = match self.seen.lock() {
      Ok(seen) => seen,
      Err(poisoned) => poisoned.into_inner(),
    };
    seen.insert(key)
  }

  pub fn token(&self) -> Option<&str> {
    self.token.get().map(String::as_str)
  }
}

fn mint_token() -> String {
  let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
  let mut hasher = Sha256::new();
  hasher.update(std::process::id().to_le_bytes());
  hasher.update(nanos.to_le_bytes());
  hex::encode(hasher.finalize())[..16].to_string()
}

/// Decides whether a cached read is acceptable.
#[derive(Debug, Clone)]
pub struct StalenessPolicy {
  session: Arc<Session>,
  window: Duration,
}

impl StalenessPolicy {
  pub fn new(session: Arc<Session>, window: Duration) -> Self {
    Self { session, window }
  }

  /// True when the caller must refetch: the first read of `key` this session, or
  /// a last successful fetch older than the freshness window.
  pub fn should_refresh<S: CacheStore>(
    &self,
    key: CacheKey,
    store: &S,
    now: DateTime<Utc>,
  ) -> bool {
    if self.session.is_new_for(key) {
      debug!(key = %key, "first read this session; refetching");
      return true;
    }

    let last_fetch = match store.last_fetch_time(CacheKey::LastFetchTime) {
      Ok(at) => at,
      Err(e) => {
        warn!(error = %e, "could not read last fetch time");
        None
      }
    };
    is_expired(last_fetch, now, self.window)
  }
}

/// A missing timestamp counts as expired.
pub fn is_expired(last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
  match last_fetch {
    Some(at) => now - at > window,
    None => true,
  }
}
