//! Serde types matching the rows and payloads of the REST data store.
//!
//! These types are separate from domain types so that column naming and
//! wire quirks (numeric ids, timestamps without offsets) stay out of the
//! rest of the client.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::types::{Subtask, SubtaskId, SubtaskPatch, Task, TaskId, TaskPatch};

/// Columns requested for task rows.
pub const TASK_COLUMNS: &str = "id,text,date,important,completed,completed_at,created_at";

/// Columns requested for subtask rows.
pub const SUBTASK_COLUMNS: &str = "id,todo_id,text,completed";

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTask {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub date: Option<NaiveDate>,
  #[serde(default)]
  pub important: bool,
  #[serde(default)]
  pub completed: bool,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
}

impl ApiTask {
  pub fn into_task(self) -> Task {
    Task {
      id: TaskId(self.id),
      text: self.text,
      due_date: self.date,
      important: self.important,
      completed: self.completed,
      completed_at: self.completed_at,
      created_at: self.created_at,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSubtask {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(deserialize_with = "deserialize_id")]
  pub todo_id: String,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub completed: bool,
}

impl ApiSubtask {
  pub fn into_subtask(self) -> Subtask {
    Subtask {
      id: SubtaskId(self.id),
      task_id: TaskId(self.todo_id),
      text: self.text,
      completed: self.completed,
    }
  }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiNewTask<'a> {
  pub text: &'a str,
  pub date: Option<NaiveDate>,
  pub completed: bool,
  pub important: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiNewSubtask<'a> {
  pub todo_id: &'a str,
  pub text: &'a str,
  pub completed: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiTaskPatch<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date: Option<Option<NaiveDate>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub important: Option<bool>,
}

impl<'a> From<&'a TaskPatch> for ApiTaskPatch<'a> {
  fn from(patch: &'a TaskPatch) -> Self {
    Self {
      text: patch.text.as_deref(),
      date: patch.due_date,
      important: patch.important,
    }
  }
}

/// Completion is always written as a pair so the store never holds a
/// completed row without a timestamp written by this client.
#[derive(Debug, Serialize)]
pub struct ApiCompletion {
  pub completed: bool,
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiSubtaskPatch<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
}

impl<'a> From<&'a SubtaskPatch> for ApiSubtaskPatch<'a> {
  fn from(patch: &'a SubtaskPatch) -> Self {
    Self {
      text: patch.text.as_deref(),
      completed: patch.completed,
    }
  }
}

// ============================================================================
// Field helpers
// ============================================================================

/// Ids are uuids on most schemas but plain integers on some.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum RawId {
    Text(String),
    Number(i64),
  }

  Ok(match RawId::deserialize(deserializer)? {
    RawId::Text(s) => s,
    RawId::Number(n) => n.to_string(),
  })
}

/// Accepts RFC 3339 timestamps and, for `timestamp without time zone`
/// columns, naive timestamps which are read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw: Option<String> = Option::deserialize(deserializer)?;
  let Some(raw) = raw else {
    return Ok(None);
  };

  if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
    return Ok(Some(dt.with_timezone(&Utc)));
  }

  NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
    .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
    .map(|dt| Some(dt.and_utc()))
    .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}
