//! The narrow CRUD contract the synchronizers consume.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::types::{Subtask, SubtaskId, SubtaskPatch, Task, TaskId, TaskPatch};

/// Failure talking to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("remote store unreachable: {0}")]
  Connectivity(String),
  #[error("remote store returned {status}: {message}")]
  Server { status: u16, message: String },
  #[error("failed to decode remote response: {0}")]
  Decode(String),
  #[error("remote store returned no row for {0}")]
  MissingRow(&'static str),
}

impl GatewayError {
  pub fn is_connectivity(&self) -> bool {
    matches!(self, GatewayError::Connectivity(_))
  }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Outcome of the lightweight connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
  Healthy,
  Unhealthy,
}

/// Remote task and subtask collections.
///
/// Each mutation either fully succeeds or leaves the remote state as it
/// was; callers only touch local state after `Ok`.
#[async_trait]
pub trait RemoteGateway: Clone + Send + Sync + 'static {
  /// Probe the store. Never fails; an error is reported as `Unhealthy`.
  async fn test_connectivity(&self) -> Health;

  /// Incomplete tasks, newest first, without subtasks.
  async fn list_active_tasks(&self) -> GatewayResult<Vec<Task>>;

  /// Completed tasks, most recently completed first, without subtasks.
  async fn list_completed_tasks(&self) -> GatewayResult<Vec<Task>>;

  async fn list_subtasks(&self, task_id: &TaskId) -> GatewayResult<Vec<Subtask>>;

  async fn create_task(&self, text: &str, due_date: Option<NaiveDate>) -> GatewayResult<Task>;

  async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> GatewayResult<()>;

  async fn delete_task(&self, id: &TaskId) -> GatewayResult<()>;

  /// Writes `completed` and `completed_at` in one update and returns the
  /// completion timestamp that was stored (`None` when reopening).
  async fn set_completed(
    &self,
    id: &TaskId,
    completed: bool,
  ) -> GatewayResult<Option<DateTime<Utc>>>;

  async fn create_subtask(&self, task_id: &TaskId, text: &str) -> GatewayResult<Subtask>;

  async fn update_subtask(&self, id: &SubtaskId, patch: &SubtaskPatch) -> GatewayResult<()>;

  async fn delete_subtask(&self, id: &SubtaskId) -> GatewayResult<()>;
}
