//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::remote::{GatewayError, GatewayResult, Health};

use super::session::StalenessPolicy;
use super::storage::CacheStore;
use super::traits::{CacheKey, CacheResult};

/// Cache layer that manages snapshot reads, writes and the read-through
/// decision shared by both synchronizers.
pub struct CacheLayer<S: CacheStore> {
  store: Arc<S>,
  policy: StalenessPolicy,
}

impl<S: CacheStore> CacheLayer<S> {
  pub fn new(store: Arc<S>, policy: StalenessPolicy) -> Self {
    Self { store, policy }
  }

  /// Read a list with the connectivity-aware read-through strategy.
  ///
  /// 1. Probe - if unhealthy, serve the snapshot (offline mode) or fail
  /// 2. Unless forced, serve the snapshot if the policy allows it
  /// 3. Fetch from the network, then replace the snapshot
  /// 4. On fetch failure, serve the snapshot (offline mode) or fail
  pub async fn fetch_list<T, P, F, Fut>(
    &self,
    key: CacheKey,
    force: bool,
    probe: P,
    fetcher: F,
  ) -> GatewayResult<CacheResult<Vec<T>>>
  where
    T: Serialize + DeserializeOwned,
    P: Future<Output = Health>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = GatewayResult<Vec<T>>>,
  {
    if probe.await == Health::Unhealthy {
      warn!(key = %key, "remote store unreachable");
      return self.offline(
        key,
        GatewayError::Connectivity("connectivity probe failed".to_string()),
      );
    }

    if !force && !self.policy.should_refresh(key, self.store.as_ref(), Utc::now()) {
      if let Some(cached) = self.snapshot::<Vec<T>>(key) {
        debug!(key = %key, count = cached.len(), "serving fresh snapshot");
        return Ok(CacheResult::from_cache(cached, self.last_fetch()));
      }
    }

    match fetcher().await {
      Ok(data) => {
        info!(key = %key, count = data.len(), force, "fetched from remote store");
        self.write_snapshot(key, &data);
        if let Err(e) = self.store.mark_fetch_time(CacheKey::LastFetchTime) {
          warn!(error = %e, "failed to stamp fetch time");
        }
        Ok(CacheResult::from_network(data))
      }
      Err(e) => {
        warn!(key = %key, error = %e, "fetch failed");
        self.offline(key, e)
      }
    }
  }

  fn offline<T: DeserializeOwned>(
    &self,
    key: CacheKey,
    error: GatewayError,
  ) -> GatewayResult<CacheResult<Vec<T>>> {
    match self.snapshot::<Vec<T>>(key) {
      Some(cached) => {
        info!(key = %key, count = cached.len(), "serving snapshot in offline mode");
        Ok(CacheResult::offline(cached, self.last_fetch()))
      }
      None => Err(error),
    }
  }

  /// The snapshot under `key`; store errors and corrupt entries are misses.
  pub fn snapshot<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
    match self.store.get_json::<T>(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(key = %key, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Replace the snapshot under `key`. Failures are logged, not returned:
  /// the snapshot is a mirror, never the source of truth.
  pub fn write_snapshot<T: Serialize>(&self, key: CacheKey, value: &T) {
    if let Err(e) = self.store.put_json(key, value) {
      warn!(key = %key, error = %e, "cache write failed");
    }
  }

  pub fn invalidate(&self, key: CacheKey) {
    debug!(key = %key, "invalidating snapshot");
    if let Err(e) = self.store.clear(key) {
      warn!(key = %key, error = %e, "cache clear failed");
    }
  }

  fn last_fetch(&self) -> Option<chrono::DateTime<Utc>> {
    self
      .store
      .last_fetch_time(CacheKey::LastFetchTime)
      .ok()
      .flatten()
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      policy: self.policy.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Session, SqliteStore};
  use crate::cache::CacheSource;
  use chrono::Duration;
  use std::cell::Cell;

  fn layer() -> (CacheLayer<SqliteStore>, Arc<Session>) {
    let session = Arc::new(Session::new());
    let policy = StalenessPolicy::new(session.clone(), Duration::hours(1));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    (CacheLayer::new(store, policy), session)
  }

  async fn healthy() -> Health {
    Health::Healthy
  }

  async fn unhealthy() -> Health {
    Health::Unhealthy
  }

  #[tokio::test]
  async fn test_first_read_of_session_fetches_even_with_snapshot() {
    let (layer, _) = layer();
    layer.write_snapshot(CacheKey::ActiveTasks, &vec![1u32]);

    let result = layer
      .fetch_list(CacheKey::ActiveTasks, false, healthy(), || async {
        Ok(vec![2u32, 3])
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![2, 3]);
    assert_eq!(layer.snapshot::<Vec<u32>>(CacheKey::ActiveTasks), Some(vec![2, 3]));
  }

  #[tokio::test]
  async fn test_fresh_snapshot_skips_fetch() {
    let (layer, session) = layer();
    session.is_new_for(CacheKey::ActiveTasks);
    layer.write_snapshot(CacheKey::ActiveTasks, &vec![1u32]);

    let fetched = Cell::new(false);
    let result = layer
      .fetch_list(CacheKey::ActiveTasks, false, healthy(), || {
        fetched.set(true);
        async { Ok(vec![9u32]) }
      })
      .await
      .unwrap();

    assert!(!fetched.get());
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data, vec![1]);
  }

  #[tokio::test]
  async fn test_forced_read_bypasses_policy() {
    let (layer, session) = layer();
    session.is_new_for(CacheKey::ActiveTasks);
    layer.write_snapshot(CacheKey::ActiveTasks, &vec![1u32]);

    let result = layer
      .fetch_list(CacheKey::ActiveTasks, true, healthy(), || async {
        Ok(vec![9u32])
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![9]);
  }

  #[tokio::test]
  async fn test_unhealthy_probe_serves_snapshot_without_fetching() {
    let (layer, _) = layer();
    layer.write_snapshot(CacheKey::CompletedTasks, &vec![5u32]);

    let fetched = Cell::new(false);
    let result = layer
      .fetch_list(CacheKey::CompletedTasks, true, unhealthy(), || {
        fetched.set(true);
        async { Ok(vec![9u32]) }
      })
      .await
      .unwrap();

    assert!(!fetched.get());
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, vec![5]);
  }

  #[tokio::test]
  async fn test_failed_fetch_without_snapshot_is_an_error() {
    let (layer, _) = layer();
    let result = layer
      .fetch_list::<u32, _, _, _>(CacheKey::ActiveTasks, false, healthy(), || async {
        Err(GatewayError::Connectivity("down".to_string()))
      })
      .await;
    assert!(matches!(result, Err(GatewayError::Connectivity(_))));
  }

  #[tokio::test]
  async fn test_failed_fetch_falls_back_to_snapshot() {
    let (layer, _) = layer();
    layer.write_snapshot(CacheKey::ActiveTasks, &vec![4u32]);

    let result = layer
      .fetch_list::<u32, _, _, _>(CacheKey::ActiveTasks, false, healthy(), || async {
        Err(GatewayError::Server {
          status: 503,
          message: "unavailable".to_string(),
        })
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, vec![4]);
  }
}
