use crate::remote::{GatewayError, SubtaskId, TaskId};

/// Failure of a synchronizer intent.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("cannot reach the task store and no cached data is available: {0}")]
  Unavailable(#[source] GatewayError),
  #[error("failed to {action}: {source}")]
  Mutation {
    action: &'static str,
    #[source]
    source: GatewayError,
  },
  #[error("failed to load subtasks: {0}")]
  SubtaskLoad(#[source] GatewayError),
  #[error("task not found: {0}")]
  UnknownTask(TaskId),
  #[error("subtask not found: {0}")]
  UnknownSubtask(SubtaskId),
}
