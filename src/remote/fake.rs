//! In-memory gateway used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::gateway::{GatewayError, GatewayResult, Health, RemoteGateway};
use super::types::{Subtask, SubtaskId, SubtaskPatch, Task, TaskId, TaskPatch};

#[derive(Default)]
struct State {
  tasks: Vec<Task>,
  subtasks: Vec<Subtask>,
  next_id: u64,
  offline: bool,
  fail_next_mutation: bool,
  completion_time: Option<DateTime<Utc>>,
  omit_completion_stamp: bool,
  calls: HashMap<&'static str, usize>,
}

/// Shared fake store; clones observe the same state.
#[derive(Clone, Default)]
pub struct FakeGateway {
  state: Arc<Mutex<State>>,
}

impl FakeGateway {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  /// Seed an incomplete task whose creation time orders it after earlier seeds.
  pub fn seed_task(&self, id: &str, text: &str) -> Task {
    let mut state = self.lock();
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
      + Duration::minutes(state.tasks.len() as i64);
    let task = Task {
      id: TaskId::from(id),
      text: text.to_string(),
      due_date: None,
      important: false,
      completed: false,
      completed_at: None,
      created_at: Some(created),
    };
    state.tasks.push(task.clone());
    task
  }

  pub fn seed_completed(&self, id: &str, text: &str, at: Option<DateTime<Utc>>) -> Task {
    let mut state = self.lock();
    let task = Task {
      id: TaskId::from(id),
      text: text.to_string(),
      due_date: None,
      important: false,
      completed: true,
      completed_at: at,
      created_at: Some(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap()),
    };
    state.tasks.push(task.clone());
    task
  }

  pub fn seed_subtask(&self, task_id: &str, id: &str, text: &str) {
    self.lock().subtasks.push(Subtask {
      id: SubtaskId::from(id),
      task_id: TaskId::from(task_id),
      text: text.to_string(),
      completed: false,
    });
  }

  pub fn set_offline(&self, offline: bool) {
    self.lock().offline = offline;
  }

  pub fn fail_next_mutation(&self) {
    self.lock().fail_next_mutation = true;
  }

  /// Fix the timestamp written by `set_completed`.
  pub fn set_completion_time(&self, at: DateTime<Utc>) {
    self.lock().completion_time = Some(at);
  }

  /// The next `set_completed(true)` succeeds but reports no timestamp.
  pub fn omit_completion_stamp(&self) {
    self.lock().omit_completion_stamp = true;
  }

  pub fn calls(&self, op: &str) -> usize {
    self.lock().calls.get(op).copied().unwrap_or(0)
  }

  pub fn task(&self, id: &str) -> Option<Task> {
    self.lock().tasks.iter().find(|t| t.id.0 == id).cloned()
  }

  pub fn subtask_count(&self) -> usize {
    self.lock().subtasks.len()
  }

  fn read(&self, op: &'static str) -> GatewayResult<MutexGuard<'_, State>> {
    let mut state = self.lock();
    *state.calls.entry(op).or_default() += 1;
    if state.offline {
      return Err(GatewayError::Connectivity("fake store offline".to_string()));
    }
    Ok(state)
  }

  fn write(&self, op: &'static str) -> GatewayResult<MutexGuard<'_, State>> {
    let mut state = self.read(op)?;
    if state.fail_next_mutation {
      state.fail_next_mutation = false;
      return Err(GatewayError::Server {
        status: 500,
        message: "injected failure".to_string(),
      });
    }
    Ok(state)
  }
}

impl State {
  fn next_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}{}", prefix, self.next_id)
  }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
  async fn test_connectivity(&self) -> Health {
    match self.read("test_connectivity") {
      Ok(_) => Health::Healthy,
      Err(_) => Health::Unhealthy,
    }
  }

  async fn list_active_tasks(&self) -> GatewayResult<Vec<Task>> {
    let state = self.read("list_active_tasks")?;
    let mut tasks: Vec<Task> = state.tasks.iter().filter(|t| !t.completed).cloned().collect();
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(tasks)
  }

  async fn list_completed_tasks(&self) -> GatewayResult<Vec<Task>> {
    let state = self.read("list_completed_tasks")?;
    let mut tasks: Vec<Task> = state.tasks.iter().filter(|t| t.completed).cloned().collect();
    tasks.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    Ok(tasks)
  }

  async fn list_subtasks(&self, task_id: &TaskId) -> GatewayResult<Vec<Subtask>> {
    let state = self.read("list_subtasks")?;
    Ok(
      state
        .subtasks
        .iter()
        .filter(|s| &s.task_id == task_id)
        .cloned()
        .collect(),
    )
  }

  async fn create_task(&self, text: &str, due_date: Option<NaiveDate>) -> GatewayResult<Task> {
    let mut state = self.write("create_task")?;
    let id = state.next_id("created-t");
    let task = Task {
      id: TaskId(id),
      text: text.to_string(),
      due_date,
      important: false,
      completed: false,
      completed_at: None,
      created_at: Some(Utc::now()),
    };
    state.tasks.push(task.clone());
    Ok(task)
  }

  async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> GatewayResult<()> {
    let mut state = self.write("update_task")?;
    if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) {
      if let Some(text) = &patch.text {
        task.text = text.clone();
      }
      if let Some(due_date) = patch.due_date {
        task.due_date = due_date;
      }
      if let Some(important) = patch.important {
        task.important = important;
      }
    }
    Ok(())
  }

  async fn delete_task(&self, id: &TaskId) -> GatewayResult<()> {
    let mut state = self.write("delete_task")?;
    state.tasks.retain(|t| &t.id != id);
    state.subtasks.retain(|s| &s.task_id != id);
    Ok(())
  }

  async fn set_completed(
    &self,
    id: &TaskId,
    completed: bool,
  ) -> GatewayResult<Option<DateTime<Utc>>> {
    let mut state = self.write("set_completed")?;
    let at = completed.then(|| state.completion_time.unwrap_or_else(Utc::now));
    if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) {
      task.completed = completed;
      task.completed_at = at;
    }
    if completed && std::mem::take(&mut state.omit_completion_stamp) {
      return Ok(None);
    }
    Ok(at)
  }

  async fn create_subtask(&self, task_id: &TaskId, text: &str) -> GatewayResult<Subtask> {
    let mut state = self.write("create_subtask")?;
    let id = state.next_id("created-s");
    let subtask = Subtask {
      id: SubtaskId(id),
      task_id: task_id.clone(),
      text: text.to_string(),
      completed: false,
    };
    state.subtasks.push(subtask.clone());
    Ok(subtask)
  }

  async fn update_subtask(&self, id: &SubtaskId, patch: &SubtaskPatch) -> GatewayResult<()> {
    let mut state = self.write("update_subtask")?;
    if let Some(sub) = state.subtasks.iter_mut().find(|s| &s.id == id) {
      if let Some(text) = &patch.text {
        sub.text = text.clone();
      }
      if let Some(completed) = patch.completed {
        sub.completed = completed;
      }
    }
    Ok(())
  }

  async fn delete_subtask(&self, id: &SubtaskId) -> GatewayResult<()> {
    let mut state = self.write("delete_subtask")?;
    state.subtasks.retain(|s| &s.id != id);
    Ok(())
  }
}
