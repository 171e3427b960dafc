//! Plain-text rendering of tasks for the terminal.

use chrono::{FixedOffset, NaiveDate};

use crate::remote::{Subtask, Task};
use crate::sync::{Notice, Severity, SubtaskLoad, TaskEntry};

const TEXT_WIDTH: usize = 60;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Due date with weekday, flagged relative to `today`.
pub fn format_due(due: NaiveDate, today: NaiveDate) -> String {
  let label = due.format("%a, %b %-d").to_string();
  if due < today {
    format!("{} (overdue)", label)
  } else if due == today {
    format!("{} (today)", label)
  } else {
    label
  }
}

pub fn task_line(index: usize, entry: &TaskEntry, today: NaiveDate) -> String {
  let task = &entry.task;
  let mut line = format!(
    "{:>3}. [{}] {}{}",
    index,
    if task.completed { "x" } else { " " },
    if task.important { "* " } else { "" },
    truncate(&task.text, TEXT_WIDTH)
  );
  if let Some(due) = task.due_date {
    line.push_str(&format!("  due {}", format_due(due, today)));
  }
  match entry.subtasks_state {
    SubtaskLoad::Loaded if !entry.subtasks.is_empty() => {
      let done = entry.subtasks.iter().filter(|s| s.completed).count();
      line.push_str(&format!("  ({}/{})", done, entry.subtasks.len()));
    }
    SubtaskLoad::Loading => line.push_str("  (loading...)"),
    _ => {}
  }
  line
}

pub fn subtask_line(index: usize, subtask: &Subtask) -> String {
  format!(
    "       {}. [{}] {}",
    index,
    if subtask.completed { "x" } else { " " },
    truncate(&subtask.text, TEXT_WIDTH)
  )
}

pub fn completed_line(index: usize, task: &Task, offset: FixedOffset) -> String {
  let when = task
    .completed_at
    .map(|at| at.with_timezone(&offset).format("%a, %b %-d %H:%M").to_string())
    .unwrap_or_else(|| "unknown".to_string());
  format!(
    "{:>3}. [x] {}  completed {}",
    index,
    truncate(&task.text, TEXT_WIDTH),
    when
  )
}

pub fn notice_line(notice: &Notice) -> String {
  let marker = match notice.severity {
    Severity::Info => "i",
    Severity::Destructive => "!",
  };
  format!("[{}] {}: {}", marker, notice.title, notice.message)
}
