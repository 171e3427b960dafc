//! Synchronizer for the active (incomplete) task list.
//!
//! Reads go through [`CacheLayer::fetch_list`]. Every mutation is
//! remote-first: local state and the snapshot change only after the
//! gateway call succeeds, and always by building a new list.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheLayer, CacheSource, CacheStore};
use crate::remote::{
  GatewayError, GatewayResult, RemoteGateway, Subtask, SubtaskId, SubtaskPatch, Task, TaskId,
  TaskPatch,
};

use super::error::SyncError;
use super::notify::Notifier;
use super::op::{ListState, OpState, Signals};

/// Per-task subtask loading marker. Never sent to the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskLoad {
  #[default]
  NotRequested,
  Loading,
  Loaded,
}

/// A task in the active list together with its lazily loaded subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
  pub task: Task,
  #[serde(default)]
  pub subtasks: Vec<Subtask>,
  #[serde(default)]
  pub subtasks_state: SubtaskLoad,
}

impl TaskEntry {
  pub fn new(task: Task) -> Self {
    Self {
      task,
      subtasks: Vec::new(),
      subtasks_state: SubtaskLoad::NotRequested,
    }
  }

  pub fn id(&self) -> &TaskId {
    &self.task.id
  }

  fn with_task(self, task: Task) -> Self {
    Self { task, ..self }
  }

  fn with_subtasks(self, subtasks: Vec<Subtask>, subtasks_state: SubtaskLoad) -> Self {
    Self {
      subtasks,
      subtasks_state,
      ..self
    }
  }

  /// A snapshot taken mid-load has no request behind it anymore.
  fn restored(self) -> Self {
    if self.subtasks_state == SubtaskLoad::Loading {
      Self {
        subtasks_state: SubtaskLoad::NotRequested,
        ..self
      }
    } else {
      self
    }
  }
}

/// An outstanding subtask request for one task.
///
/// Obtained from [`TaskListSync::begin_subtask_load`]; run it anywhere and
/// hand the result to [`TaskListSync::finish_subtask_load`].
pub struct SubtaskFetch<G> {
  gateway: G,
  task_id: TaskId,
}

impl<G: RemoteGateway> SubtaskFetch<G> {
  pub async fn run(self) -> (TaskId, GatewayResult<Vec<Subtask>>) {
    let result = self.gateway.list_subtasks(&self.task_id).await;
    (self.task_id, result)
  }
}

/// Keeps the in-memory active list, the remote store and the snapshot coherent.
pub struct TaskListSync<G: RemoteGateway, S: CacheStore> {
  gateway: G,
  cache: CacheLayer<S>,
  notifier: Notifier,
  tasks: Vec<TaskEntry>,
  state: ListState,
  refresh: OpState,
  submit: OpState,
  connection_error: bool,
}

impl<G: RemoteGateway, S: CacheStore> TaskListSync<G, S> {
  pub fn new(gateway: G, cache: CacheLayer<S>, notifier: Notifier) -> Self {
    Self {
      gateway,
      cache,
      notifier,
      tasks: Vec::new(),
      state: ListState::Idle,
      refresh: OpState::Idle,
      submit: OpState::Idle,
      connection_error: false,
    }
  }

  pub fn tasks(&self) -> &[TaskEntry] {
    &self.tasks
  }

  pub fn entry(&self, id: &TaskId) -> Option<&TaskEntry> {
    self.tasks.iter().find(|e| e.id() == id)
  }

  pub fn state(&self) -> &ListState {
    &self.state
  }

  pub fn refresh_state(&self) -> &OpState {
    &self.refresh
  }

  pub fn submit_state(&self) -> &OpState {
    &self.submit
  }

  pub fn signals(&self) -> Signals {
    Signals {
      loading: self.state.is_loading(),
      refreshing: self.refresh.is_in_flight(),
      submitting: self.submit.is_in_flight(),
      connection_error: self.connection_error,
    }
  }

  // ==========================================================================
  // Read path
  // ==========================================================================

  /// Load the list, from the snapshot when the staleness policy allows it.
  /// `force` always goes to the network when it is reachable.
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
        CacheKey::ActiveTasks,
        force,
        gateway.test_connectivity(),
        || async move {
          gateway
            .list_active_tasks()
            .await
            .map(|tasks| tasks.into_iter().map(TaskEntry::new).collect::<Vec<_>>())
        },
      )
      .await;

    let outcome = match result {
      Ok(loaded) => {
        let source = loaded.source;
        self.tasks = loaded.data.into_iter().map(TaskEntry::restored).collect();
        self.state = ListState::Ready {
          degraded: source.is_degraded(),
        };

        if source.is_degraded() {
          info!(cached_at = ?loaded.cached_at, "serving cached tasks while offline");
          self.connection_error = true;
          self.notifier.destructive(
            "Offline mode",
            "Showing cached tasks. Check your network connection.",
          );
        } else if force && source == CacheSource::Network {
          self.notifier.info("Refreshed", "The task list is up to date.");
        }
        Ok(source)
      }
      Err(e) => {
        warn!(error = %e, "active tasks unavailable");
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

  /// Explicit user refresh.
  pub async fn refresh(&mut self) -> Result<CacheSource, SyncError> {
    self.load(true).await
  }

  // ==========================================================================
  // Task mutations
  // ==========================================================================

  /// Create a task at the top of the list. Blank text is ignored.
  pub async fn add_task(
    &mut self,
    text: &str,
    due_date: Option<NaiveDate>,
  ) -> Result<Option<TaskId>, SyncError> {
    let text = text.trim();
    if text.is_empty() {
      return Ok(None);
    }

    self.submit = OpState::InFlight;
    let result = self.gateway.create_task(text, due_date).await;
    self.submit.settle(&result);

    let task = result.map_err(|e| self.mutation_failed("add the task", e))?;
    let id = task.id.clone();

    let mut next = Vec::with_capacity(self.tasks.len() + 1);
    next.push(TaskEntry::new(task));
    next.extend(self.tasks.iter().cloned());
    self.commit(next);

    info!(task = %id, "task added");
    Ok(Some(id))
  }

  /// Mark a task completed. It leaves the active list, the archive
  /// snapshot is invalidated and the completed task is returned.
  pub async fn complete_task(&mut self, id: &TaskId) -> Result<Task, SyncError> {
    let task = self.require(id)?.task.clone();

    let at = self
      .gateway
      .set_completed(id, true)
      .await
      .and_then(|stamp| stamp.ok_or(GatewayError::MissingRow("completion timestamp")))
      .map_err(|e| self.mutation_failed("complete the task", e))?;

    let next = self
      .tasks
      .iter()
      .filter(|e| e.id() != id)
      .cloned()
      .collect();
    self.commit(next);
    self.cache.invalidate(CacheKey::CompletedTasks);
    info!(task = %id, completed_at = %at, "task completed");
    Ok(task.mark_completed(at))
  }

  /// Bring a completed task back into the active list at its creation-time
  /// position, without refetching the list.
  pub async fn reopen(&mut self, task: Task) -> Result<(), SyncError> {
    self
      .gateway
      .set_completed(&task.id, false)
      .await
      .map_err(|e| self.mutation_failed("restore the task", e))?;

    let entry = TaskEntry::new(task.reopened());
    let mut next: Vec<TaskEntry> = self
      .tasks
      .iter()
      .filter(|e| e.id() != entry.id())
      .cloned()
      .collect();

    let position = match entry.task.created_at {
      Some(created) => next
        .iter()
        .position(|e| e.task.created_at.map_or(true, |c| c < created))
        .unwrap_or(next.len()),
      None => next.len(),
    };
    info!(task = %entry.id(), position, "task reopened");
    next.insert(position, entry);
    self.commit(next);
    Ok(())
  }

  pub async fn delete_task(&mut self, id: &TaskId) -> Result<(), SyncError> {
    self.require(id)?;

    self
      .gateway
      .delete_task(id)
      .await
      .map_err(|e| self.mutation_failed("delete the task", e))?;

    let next = self
      .tasks
      .iter()
      .filter(|e| e.id() != id)
      .cloned()
      .collect();
    self.commit(next);
    Ok(())
  }

  pub async fn toggle_important(&mut self, id: &TaskId) -> Result<(), SyncError> {
    let important = !self.require(id)?.task.important;

    let patch = TaskPatch {
      important: Some(important),
      ..Default::default()
    };
    self
      .gateway
      .update_task(id, &patch)
      .await
      .map_err(|e| self.mutation_failed("change the importance", e))?;

    self.replace_entry(id, |entry| {
      let task = entry.task.clone().with_important(important);
      entry.with_task(task)
    });
    Ok(())
  }

  /// Replace text and due date. Returns false (and does nothing) for blank text.
  pub async fn edit_task(
    &mut self,
    id: &TaskId,
    text: &str,
    due_date: Option<NaiveDate>,
  ) -> Result<bool, SyncError> {
    self.require(id)?;
    let text = text.trim();
    if text.is_empty() {
      return Ok(false);
    }

    let patch = TaskPatch {
      text: Some(text.to_string()),
      due_date: Some(due_date),
      important: None,
    };
    self
      .gateway
      .update_task(id, &patch)
      .await
      .map_err(|e| self.mutation_failed("update the task", e))?;

    let text = text.to_string();
    self.replace_entry(id, |entry| {
      let task = entry.task.clone().edited(text, due_date);
      entry.with_task(task)
    });
    Ok(true)
  }

  // ==========================================================================
  // Lazy subtasks
  // ==========================================================================

  /// Load a task's subtasks unless they are already loaded or loading.
  /// Returns the subtasks currently known for the task.
  pub async fn expand(&mut self, id: &TaskId) -> Result<Vec<Subtask>, SyncError> {
    if let Some(fetch) = self.begin_subtask_load(id)? {
      let (task_id, result) = fetch.run().await;
      self.finish_subtask_load(&task_id, result)?;
    }
    Ok(self.require(id)?.subtasks.clone())
  }

  /// Mark a task's subtasks as loading and hand out the request.
  ///
  /// Returns `None` when the subtasks are already loaded or a request for
  /// the same task is outstanding, so at most one request per task exists.
  pub fn begin_subtask_load(&mut self, id: &TaskId) -> Result<Option<SubtaskFetch<G>>, SyncError> {
    let index = self.index_of(id)?;
    if self.tasks[index].subtasks_state != SubtaskLoad::NotRequested {
      debug!(task = %id, state = ?self.tasks[index].subtasks_state, "subtask load skipped");
      return Ok(None);
    }

    let mut next = self.tasks.clone();
    next[index] = next[index]
      .clone()
      .with_subtasks(Vec::new(), SubtaskLoad::Loading);
    self.tasks = next;

    Ok(Some(SubtaskFetch {
      gateway: self.gateway.clone(),
      task_id: id.clone(),
    }))
  }

  /// Apply the result of a [`SubtaskFetch`]. Only the owning task's slot changes.
  pub fn finish_subtask_load(
    &mut self,
    id: &TaskId,
    result: GatewayResult<Vec<Subtask>>,
  ) -> Result<(), SyncError> {
    if self.entry(id).is_none() {
      debug!(task = %id, "task left the list before its subtasks arrived");
      return Ok(());
    }

    match result {
      Ok(subtasks) => {
        debug!(task = %id, count = subtasks.len(), "subtasks loaded");
        self.replace_entry(id, |entry| {
          entry.with_subtasks(subtasks, SubtaskLoad::Loaded)
        });
        Ok(())
      }
      Err(e) => {
        warn!(task = %id, error = %e, "subtask load failed");
        let mut next = self.tasks.clone();
        if let Some(index) = next.iter().position(|entry| entry.id() == id) {
          next[index] = next[index]
            .clone()
            .with_subtasks(Vec::new(), SubtaskLoad::NotRequested);
        }
        self.tasks = next;
        self
          .notifier
          .destructive("Error", "Could not load subtasks. Please try again.");
        Err(SyncError::SubtaskLoad(e))
      }
    }
  }

  /// Forget loaded subtasks so the next expand fetches them again.
  pub fn invalidate_subtasks(&mut self, id: &TaskId) -> Result<(), SyncError> {
    self.require(id)?;
    self.replace_entry(id, |entry| {
      entry.with_subtasks(Vec::new(), SubtaskLoad::NotRequested)
    });
    Ok(())
  }

  /// Append a subtask. Blank text is ignored. Unloaded subtasks are loaded
  /// first so the new one is not shadowed by a later lazy load.
  pub async fn add_subtask(
    &mut self,
    task_id: &TaskId,
    text: &str,
  ) -> Result<Option<SubtaskId>, SyncError> {
    self.require(task_id)?;
    let text = text.trim();
    if text.is_empty() {
      return Ok(None);
    }

    if self.require(task_id)?.subtasks_state != SubtaskLoad::Loaded {
      self.expand(task_id).await?;
    }

    self.submit = OpState::InFlight;
    let result = self.gateway.create_subtask(task_id, text).await;
    self.submit.settle(&result);

    let subtask = result.map_err(|e| self.mutation_failed("add the subtask", e))?;
    let id = subtask.id.clone();

    self.replace_entry(task_id, |entry| {
      let mut subtasks = entry.subtasks.clone();
      subtasks.push(subtask);
      entry.with_subtasks(subtasks, SubtaskLoad::Loaded)
    });
    Ok(Some(id))
  }

  pub async fn toggle_subtask(
    &mut self,
    task_id: &TaskId,
    subtask_id: &SubtaskId,
  ) -> Result<(), SyncError> {
    let completed = !self.require_subtask(task_id, subtask_id)?.completed;

    let patch = SubtaskPatch {
      completed: Some(completed),
      ..Default::default()
    };
    self
      .gateway
      .update_subtask(subtask_id, &patch)
      .await
      .map_err(|e| self.mutation_failed("change the subtask status", e))?;

    self.map_subtasks(task_id, |subtasks| {
      subtasks
        .into_iter()
        .map(|s| if &s.id == subtask_id { s.toggled() } else { s })
        .collect()
    });
    Ok(())
  }

  /// Rename a subtask. Returns false (and does nothing) for blank text.
  pub async fn rename_subtask(
    &mut self,
    task_id: &TaskId,
    subtask_id: &SubtaskId,
    text: &str,
  ) -> Result<bool, SyncError> {
    self.require_subtask(task_id, subtask_id)?;
    let text = text.trim();
    if text.is_empty() {
      return Ok(false);
    }

    let patch = SubtaskPatch {
      text: Some(text.to_string()),
      ..Default::default()
    };
    self
      .gateway
      .update_subtask(subtask_id, &patch)
      .await
      .map_err(|e| self.mutation_failed("rename the subtask", e))?;

    self.map_subtasks(task_id, |subtasks| {
      subtasks
        .into_iter()
        .map(|s| {
          if &s.id == subtask_id {
            s.renamed(text.to_string())
          } else {
            s
          }
        })
        .collect()
    });
    Ok(true)
  }

  pub async fn delete_subtask(
    &mut self,
    task_id: &TaskId,
    subtask_id: &SubtaskId,
  ) -> Result<(), SyncError> {
    self.require_subtask(task_id, subtask_id)?;

    self
      .gateway
      .delete_subtask(subtask_id)
      .await
      .map_err(|e| self.mutation_failed("delete the subtask", e))?;

    self.map_subtasks(task_id, |subtasks| {
      subtasks.into_iter().filter(|s| &s.id != subtask_id).collect()
    });
    Ok(())
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  fn index_of(&self, id: &TaskId) -> Result<usize, SyncError> {
    self
      .tasks
      .iter()
      .position(|e| e.id() == id)
      .ok_or_else(|| SyncError::UnknownTask(id.clone()))
  }

  fn require(&self, id: &TaskId) -> Result<&TaskEntry, SyncError> {
    self
      .entry(id)
      .ok_or_else(|| SyncError::UnknownTask(id.clone()))
  }

  fn require_subtask(&self, task_id: &TaskId, subtask_id: &SubtaskId) -> Result<&Subtask, SyncError> {
    self
      .require(task_id)?
      .subtasks
      .iter()
      .find(|s| &s.id == subtask_id)
      .ok_or_else(|| SyncError::UnknownSubtask(subtask_id.clone()))
  }

  /// Swap in a new list and mirror it to the snapshot.
  fn commit(&mut self, next: Vec<TaskEntry>) {
    self.tasks = next;
    self.cache.write_snapshot(CacheKey::ActiveTasks, &self.tasks);
  }

  /// Commit a list where only the entry for `id` is replaced by `f(entry)`.
  fn replace_entry(&mut self, id: &TaskId, f: impl FnOnce(TaskEntry) -> TaskEntry) {
    let Some(index) = self.tasks.iter().position(|e| e.id() == id) else {
      return;
    };
    let mut next = self.tasks.clone();
    next[index] = f(next[index].clone());
    self.commit(next);
  }

  fn map_subtasks(&mut self, task_id: &TaskId, f: impl FnOnce(Vec<Subtask>) -> Vec<Subtask>) {
    self.replace_entry(task_id, |entry| {
      let subtasks = f(entry.subtasks.clone());
      let state = entry.subtasks_state;
      entry.with_subtasks(subtasks, state)
    });
  }

  fn mutation_failed(&self, action: &'static str, source: GatewayError) -> SyncError {
    warn!(error = %source, "failed to {}", action);
    let hint = if source.is_connectivity() {
      "Check your network connection."
    } else {
      "Please try again."
    };
    self
      .notifier
      .destructive("Error", &format!("Could not {}. {}", action, hint));
    SyncError::Mutation { action, source }
  }
}
