//! Synchronizer for completed tasks and their date-range view.

use chrono::FixedOffset;
use tracing::{info, warn};

use crate::cache::{CacheKey, CacheLayer, CacheSource, CacheStore};
use crate::remote::{RemoteGateway, Task, TaskId};

use super::error::SyncError;
use super::filter::{filter_completed, DateRange};
use super::notify::Notifier;
use super::op::{ListState, OpState, Signals};

pub struct ArchiveSync<G: RemoteGateway, S: CacheStore> {
  gateway: G,
  cache: CacheLayer<S>,
  notifier: Notifier,
  offset: FixedOffset,
  all: Vec<Task>,
  filtered: Vec<Task>,
  range: DateRange,
  state: ListState,
  refresh: OpState,
  connection_error: bool,
}

impl<G: RemoteGateway, S: CacheStore> ArchiveSync<G, S> {
  /// `offset` decides where calendar days start for range filtering.
  pub fn new(gateway: G, cache: CacheLayer<S>, notifier: Notifier, offset: FixedOffset) -> Self {
    Self {
      gateway,
      cache,
      notifier,
      offset,
      all: Vec::new(),
      filtered: Vec::new(),
      range: DateRange::default(),
      state: ListState::Idle,
      refresh: OpState::Idle,
      connection_error: false,
    }
  }

  /// Every completed task, most recently completed first.
  pub fn all(&self) -> &[Task] {
    &self.all
  }

  /// The tasks inside the current range.
  pub fn filtered(&self) -> &[Task] {
    &self.filtered
  }

  pub fn range(&self) -> &DateRange {
    &self.range
  }

  pub fn task(&self, id: &TaskId) -> Option<&Task> {
    self.all.iter().find(|t| &t.id == id)
  }

  pub fn state(&self) -> &ListState {
    &self.state
  }

  pub fn signals(&self) -> Signals {
    Signals {
      loading: self.state.is_loading(),
      refreshing: self.refresh.is_in_flight(),
      submitting: false,
      connection_error: self.connection_error,
    }
  }

  /// What to show when the filtered view is empty.
  pub fn empty_message(&self) -> Option<&'static str> {
    if !self.filtered.is_empty() {
      None
    } else if self.all.is_empty() {
      Some("No completed tasks yet.")
    } else {
      Some("No completed tasks in the selected range.")
    }
  }

  /// Entering the archive view: drop the snapshot, then load.
  pub async fn visit(&mut self) -> Result<CacheSource, SyncError> {
    self.cache.invalidate(CacheKey::CompletedTasks);
    self.load(false).await
  }

  pub async fn load(&mut self, force: bool) -> Result<CacheSource, SyncError> {
    self.state = ListState::Loading;
    self.connection_error = false;
    if force {
      self.refresh = OpState::InFlight;
    }

    let gateway = &self.gateway;
    let result = self
      .cache
      .fetch_list(
        CacheKey::CompletedTasks,
        force,
        gateway.test_connectivity(),
        || gateway.list_completed_tasks(),
      )
      .await;

    let outcome = match result {
      Ok(loaded) => {
        let source = loaded.source;
        self.all = loaded.data;
        self.refilter();
        self.state = ListState::Ready {
          degraded: source.is_degraded(),
        };

        if source.is_degraded() {
          info!(cached_at = ?loaded.cached_at, "serving cached completed tasks while offline");
          self.connection_error = true;
          self.notifier.destructive(
            "Offline mode",
            "Showing cached completed tasks. Check your network connection.",
          );
        } else if force && source == CacheSource::Network {
          self.notifier.info("Refreshed", "Completed tasks are up to date.");
        }
        Ok(source)
      }
      Err(e) => {
        warn!(error = %e, "completed tasks unavailable");
        self.connection_error = true;
        self.state = ListState::Error(e.to_string());
        self.notifier.destructive(
          "Connection error",
          "Cannot reach the task store. Check your network connection and configuration.",
        );
        Err(SyncError::Unavailable(e))
      }
    };

    if force {
      self.refresh.settle(&outcome);
    }
    outcome
  }

  pub async fn refresh(&mut self) -> Result<CacheSource, SyncError> {
    self.load(true).await
  }

  pub fn set_range(&mut self, range: DateRange) {
    self.range = range;
    self.refilter();
  }

  pub fn clear_range(&mut self) {
    self.set_range(DateRange::default());
  }

  /// Permanently delete a completed task.
  pub async fn delete(&mut self, id: &TaskId) -> Result<(), SyncError> {
    if self.task(id).is_none() {
      return Err(SyncError::UnknownTask(id.clone()));
    }

    if let Err(e) = self.gateway.delete_task(id).await {
      warn!(task = %id, error = %e, "failed to delete completed task");
      self
        .notifier
        .destructive("Error", "Could not delete the task. Please try again.");
      return Err(SyncError::Mutation {
        action: "delete the task",
        source: e,
      });
    }

    self.forget(id);
    self.notifier.info("Deleted", "The task was deleted.");
    Ok(())
  }

  /// Drop a task from both views and the snapshot without touching the
  /// remote store. Used once the task has left the archive remotely.
  pub fn forget(&mut self, id: &TaskId) -> Option<Task> {
    let removed = self.task(id).cloned()?;
    self.all = self.all.iter().filter(|t| &t.id != id).cloned().collect();
    self.filtered = self
      .filtered
      .iter()
      .filter(|t| &t.id != id)
      .cloned()
      .collect();
    self.cache.write_snapshot(CacheKey::CompletedTasks, &self.all);
    info!(task = %id, "removed from archive");
    Some(removed)
  }

  fn refilter(&mut self) {
    self.filtered = filter_completed(&self.all, &self.range, self.offset);
  }
}
