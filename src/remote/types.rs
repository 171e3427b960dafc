use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the remote store when a task is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

/// Identifier assigned by the remote store when a subtask is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(pub String);

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Display for SubtaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for TaskId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<&str> for SubtaskId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// A todo item as known to the client.
///
/// `completed` and `completed_at` only change together through
/// [`Task::mark_completed`] and [`Task::reopened`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub id: TaskId,
  pub text: String,
  #[serde(default)]
  pub due_date: Option<NaiveDate>,
  #[serde(default)]
  pub important: bool,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

impl Task {
  /// The same task, marked completed at `at`.
  pub fn mark_completed(self, at: DateTime<Utc>) -> Self {
    Self {
      completed: true,
      completed_at: Some(at),
      ..self
    }
  }

  /// The same task with its completion reverted.
  pub fn reopened(self) -> Self {
    Self {
      completed: false,
      completed_at: None,
      ..self
    }
  }

  pub fn with_important(self, important: bool) -> Self {
    Self { important, ..self }
  }

  pub fn edited(self, text: String, due_date: Option<NaiveDate>) -> Self {
    Self {
      text,
      due_date,
      ..self
    }
  }
}

/// A checklist item owned by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
  pub id: SubtaskId,
  pub task_id: TaskId,
  pub text: String,
  #[serde(default)]
  pub completed: bool,
}

impl Subtask {
  pub fn toggled(self) -> Self {
    Self {
      completed: !self.completed,
      ..self
    }
  }

  pub fn renamed(self, text: String) -> Self {
    Self { text, ..self }
  }
}

/// Partial update of a task's editable fields. `None` leaves a field alone;
/// `due_date: Some(None)` clears the due date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
  pub text: Option<String>,
  pub due_date: Option<Option<NaiveDate>>,
  pub important: Option<bool>,
}

/// Partial update of a subtask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskPatch {
  pub text: Option<String>,
  pub completed: Option<bool>,
}
