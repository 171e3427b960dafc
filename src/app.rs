use crate::cache::{CacheKey, CacheLayer, CacheStore, Session, StalenessPolicy};
use crate::commands::{parse_due, Action, SubAction};
use crate::config::Config;
use crate::remote::{RemoteGateway, Subtask, SubtaskId, Task, TaskId};
use crate::render;
use crate::sync::{
  drain, ArchiveSync, DateRange, ListState, Notice, Notifier, OpState, SubtaskFetch,
  TaskListSync,
};
use chrono::{FixedOffset, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Application state shared by the one-shot CLI and the shell.
///
/// Owns both synchronizers; they share one session, one store and one
/// notice channel.
pub struct App<G: RemoteGateway, S: CacheStore> {
  /// Active tasks
  active: TaskListSync<G, S>,

  /// Completed tasks
  archive: ArchiveSync<G, S>,

  /// Receiving half of the notice channel
  notices: mpsc::UnboundedReceiver<Notice>,

  session: Arc<Session>,

  store: Arc<S>,

  /// Offset for "today" and archive day boundaries
  offset: FixedOffset,
}

impl<G: RemoteGateway, S: CacheStore> App<G, S> {
  pub fn new(gateway: G, store: Arc<S>, config: &Config) -> Self {
    let session = Arc::new(Session::new());
    let policy = StalenessPolicy::new(session.clone(), config.cache.freshness_window());
    let cache = CacheLayer::new(store.clone(), policy);
    let (notifier, notices) = Notifier::channel();
    let offset = config.display.offset();

    Self {
      active: TaskListSync::new(gateway.clone(), cache.clone(), notifier.clone()),
      archive: ArchiveSync::new(gateway, cache, notifier, offset),
      notices,
      session,
      store,
      offset,
    }
  }

  /// Notices emitted since the last call.
  pub fn take_notices(&mut self) -> Vec<Notice> {
    drain(&mut self.notices)
  }

  /// Run one command and return its printable output.
  pub async fn execute(&mut self, action: Action) -> Result<String> {
    debug!(?action, "executing");
    match action {
      Action::List { expand, refresh } => {
        self.active.load(refresh).await?;
        if expand {
          self.expand_all().await;
        }
        Ok(self.render_active(expand))
      }
      Action::Refresh => {
        self.active.refresh().await?;
        Ok(self.render_active(false))
      }
      Action::Add { text, due } => {
        self.ensure_active_loaded().await?;
        let due = due.map(|d| parse_due(&d, self.today())).transpose()?.flatten();
        match self.active.add_task(&text.join(" "), due).await? {
          Some(id) => Ok(format!("Added: {}", self.active_text(&id))),
          None => Ok("Nothing to add.".to_string()),
        }
      }
      Action::Done { task } => {
        let id = self.resolve_active(&task).await?;
        let done = self.active.complete_task(&id).await?;
        Ok(format!("Completed: {}", done.text))
      }
      Action::Delete { task } => {
        let id = self.resolve_active(&task).await?;
        let text = self.active_text(&id);
        self.active.delete_task(&id).await?;
        Ok(format!("Deleted: {}", text))
      }
      Action::Star { task } => {
        let id = self.resolve_active(&task).await?;
        self.active.toggle_important(&id).await?;
        let marked = self
          .active
          .entry(&id)
          .map(|e| e.task.important)
          .unwrap_or_default();
        Ok(format!(
          "{}: {}",
          if marked { "Starred" } else { "Unstarred" },
          self.active_text(&id)
        ))
      }
      Action::Edit { task, text, due } => {
        let id = self.resolve_active(&task).await?;
        let due = match due {
          Some(d) => parse_due(&d, self.today())?,
          None => self.active.entry(&id).and_then(|e| e.task.due_date),
        };
        if self.active.edit_task(&id, &text.join(" "), due).await? {
          Ok(format!("Updated: {}", self.active_text(&id)))
        } else {
          Ok("Nothing to change.".to_string())
        }
      }
      Action::Expand { task } => {
        let id = self.resolve_active(&task).await?;
        let subtasks = self.active.expand(&id).await?;
        Ok(render_subtasks(&self.active_text(&id), &subtasks))
      }
      Action::Sub(sub) => self.execute_sub(sub).await,
      Action::Archive { from, to, refresh } => {
        if refresh {
          self.archive.refresh().await?;
        } else {
          self.open_archive().await?;
        }
        if from.is_none() && to.is_none() {
          self.archive.clear_range();
        } else {
          self.archive.set_range(DateRange::new(from, to));
        }
        Ok(self.render_archive())
      }
      Action::Reopen { task } => {
        let id = self.resolve_archived(&task).await?;
        let task = self.reopen(&id).await?;
        Ok(format!("Reopened: {}", task.text))
      }
      Action::ArchiveDelete { task } => {
        let id = self.resolve_archived(&task).await?;
        self.archive.delete(&id).await?;
        Ok(format!("Deleted from archive: {}", id))
      }
      Action::Status => Ok(self.status()),
    }
  }

  async fn execute_sub(&mut self, sub: SubAction) -> Result<String> {
    match sub {
      SubAction::Add { task, text } => {
        let id = self.resolve_active(&task).await?;
        match self.active.add_subtask(&id, &text.join(" ")).await? {
          Some(_) => Ok(render_subtasks(&self.active_text(&id), self.subtasks(&id))),
          None => Ok("Nothing to add.".to_string()),
        }
      }
      SubAction::Toggle { task, subtask } => {
        let (id, sub_id) = self.resolve_subtask(&task, &subtask).await?;
        self.active.toggle_subtask(&id, &sub_id).await?;
        Ok(render_subtasks(&self.active_text(&id), self.subtasks(&id)))
      }
      SubAction::Rename {
        task,
        subtask,
        text,
      } => {
        let (id, sub_id) = self.resolve_subtask(&task, &subtask).await?;
        if !self.active.rename_subtask(&id, &sub_id, &text.join(" ")).await? {
          return Ok("Nothing to change.".to_string());
        }
        Ok(render_subtasks(&self.active_text(&id), self.subtasks(&id)))
      }
      SubAction::Delete { task, subtask } => {
        let (id, sub_id) = self.resolve_subtask(&task, &subtask).await?;
        self.active.delete_subtask(&id, &sub_id).await?;
        Ok(render_subtasks(&self.active_text(&id), self.subtasks(&id)))
      }
    }
  }

  /// Entering the archive view always starts from a fresh read.
  pub async fn open_archive(&mut self) -> Result<()> {
    self.archive.visit().await?;
    Ok(())
  }

  /// Move a completed task back to the active list.
  async fn reopen(&mut self, id: &TaskId) -> Result<Task> {
    self.ensure_active_loaded().await?;
    let task = self
      .archive
      .task(id)
      .cloned()
      .ok_or_else(|| eyre!("No completed task with id {}", id))?;

    self.active.reopen(task.clone()).await?;
    self.archive.forget(id);
    Ok(task)
  }

  /// Start lazy loads for every task that has none yet and await them together.
  async fn expand_all(&mut self) {
    let ids: Vec<TaskId> = self.active.tasks().iter().map(|e| e.id().clone()).collect();
    let mut fetches: Vec<SubtaskFetch<G>> = Vec::new();
    for id in &ids {
      match self.active.begin_subtask_load(id) {
        Ok(Some(fetch)) => fetches.push(fetch),
        Ok(None) => {}
        Err(e) => warn!(task = %id, error = %e, "cannot expand"),
      }
    }

    let results = join_all(fetches.into_iter().map(SubtaskFetch::run)).await;
    for (id, result) in results {
      if let Err(e) = self.active.finish_subtask_load(&id, result) {
        warn!(task = %id, error = %e, "subtask load failed");
      }
    }
  }

  async fn ensure_active_loaded(&mut self) -> Result<()> {
    if !self.active.state().is_ready() {
      self.active.load(false).await?;
    }
    Ok(())
  }

  async fn ensure_archive_loaded(&mut self) -> Result<()> {
    if !self.archive.state().is_ready() {
      self.open_archive().await?;
    }
    Ok(())
  }

  /// A task reference is a 1-based list position, an id, or a unique id prefix.
  async fn resolve_active(&mut self, reference: &str) -> Result<TaskId> {
    self.ensure_active_loaded().await?;
    let ids: Vec<&TaskId> = self.active.tasks().iter().map(|e| e.id()).collect();
    resolve(reference, &ids)
  }

  async fn resolve_archived(&mut self, reference: &str) -> Result<TaskId> {
    self.ensure_archive_loaded().await?;
    let ids: Vec<&TaskId> = self.archive.filtered().iter().map(|t| &t.id).collect();
    match resolve(reference, &ids) {
      Ok(id) => Ok(id),
      Err(_) if reference.parse::<usize>().is_err() => {
        // Ids outside the current range are still valid
        let all: Vec<&TaskId> = self.archive.all().iter().map(|t| &t.id).collect();
        resolve(reference, &all)
      }
      Err(e) => Err(e),
    }
  }

  async fn resolve_subtask(&mut self, task: &str, subtask: &str) -> Result<(TaskId, SubtaskId)> {
    let id = self.resolve_active(task).await?;
    let subtasks = self.active.expand(&id).await?;

    let found = match subtask.parse::<usize>() {
      Ok(n) if n >= 1 && n <= subtasks.len() => Some(subtasks[n - 1].id.clone()),
      _ => subtasks
        .iter()
        .find(|s| s.id.0 == subtask)
        .map(|s| s.id.clone()),
    };
    let sub_id = found.ok_or_else(|| eyre!("No subtask '{}' on task {}", subtask, id))?;
    Ok((id, sub_id))
  }

  fn subtasks(&self, id: &TaskId) -> &[Subtask] {
    self
      .active
      .entry(id)
      .map(|e| e.subtasks.as_slice())
      .unwrap_or_default()
  }

  fn active_text(&self, id: &TaskId) -> String {
    self
      .active
      .entry(id)
      .map(|e| e.task.text.clone())
      .unwrap_or_else(|| id.to_string())
  }

  fn today(&self) -> NaiveDate {
    Utc::now().with_timezone(&self.offset).date_naive()
  }

  fn render_active(&self, with_subtasks: bool) -> String {
    let tasks = self.active.tasks();
    if tasks.is_empty() {
      return "No tasks. Add one with `add <text>`.".to_string();
    }

    let today = self.today();
    let mut lines = Vec::new();
    for (i, entry) in tasks.iter().enumerate() {
      lines.push(render::task_line(i + 1, entry, today));
      if with_subtasks {
        for (j, subtask) in entry.subtasks.iter().enumerate() {
          lines.push(render::subtask_line(j + 1, subtask));
        }
      }
    }
    lines.join("\n")
  }

  fn render_archive(&self) -> String {
    let mut lines = Vec::new();
    let range = self.archive.range();
    if !range.is_empty() {
      let bound = |d: Option<NaiveDate>| d.map_or("...".to_string(), |d| d.to_string());
      lines.push(format!("Completed {} to {}", bound(range.from()), bound(range.to())));
    }

    match self.archive.empty_message() {
      Some(message) => lines.push(message.to_string()),
      None => lines.extend(
        self
          .archive
          .filtered()
          .iter()
          .enumerate()
          .map(|(i, task)| render::completed_line(i + 1, task, self.offset)),
      ),
    }
    lines.join("\n")
  }

  fn status(&self) -> String {
    let last_fetch = match self.store.last_fetch_time(CacheKey::LastFetchTime) {
      Ok(Some(at)) => at.with_timezone(&self.offset).format("%Y-%m-%d %H:%M:%S").to_string(),
      Ok(None) => "never".to_string(),
      Err(e) => format!("unreadable ({})", e),
    };
    let signals = self.active.signals();

    [
      format!("session:      {}", self.session.token().unwrap_or("not started")),
      format!("last fetch:   {}", last_fetch),
      format!("active:       {}", describe(self.active.state(), self.active.tasks().len())),
      format!("archive:      {}", describe(self.archive.state(), self.archive.all().len())),
      format!("last refresh: {}", describe_op(self.active.refresh_state())),
      format!("last submit:  {}", describe_op(self.active.submit_state())),
      format!(
        "connection:   {}",
        if signals.connection_error || self.archive.signals().connection_error {
          "error"
        } else {
          "ok"
        }
      ),
    ]
    .join("\n")
  }
}

fn describe(state: &ListState, count: usize) -> String {
  match state {
    ListState::Idle => "not loaded".to_string(),
    ListState::Loading => "loading".to_string(),
    ListState::Ready { degraded: false } => format!("{} tasks", count),
    ListState::Ready { degraded: true } => format!("{} tasks (offline)", count),
    ListState::Error(e) => format!("error: {}", e),
  }
}

fn describe_op(op: &OpState) -> String {
  match op {
    OpState::Idle => "none".to_string(),
    OpState::InFlight => "running".to_string(),
    OpState::Succeeded => "ok".to_string(),
    OpState::Failed(e) => format!("failed ({})", e),
  }
}

fn resolve(reference: &str, ids: &[&TaskId]) -> Result<TaskId> {
  if let Ok(n) = reference.parse::<usize>() {
    return ids
      .get(n.wrapping_sub(1))
      .map(|id| (*id).clone())
      .ok_or_else(|| eyre!("No task at position {} ({} listed)", n, ids.len()));
  }

  if let Some(id) = ids.iter().find(|id| id.0 == reference) {
    return Ok((*id).clone());
  }

  let matches: Vec<&&TaskId> = ids.iter().filter(|id| id.0.starts_with(reference)).collect();
  match matches.as_slice() {
    [only] => Ok((**only).clone()),
    [] => Err(eyre!("No task matches '{}'", reference)),
    _ => Err(eyre!("'{}' matches {} tasks; use more characters", reference, matches.len())),
  }
}

fn render_subtasks(title: &str, subtasks: &[Subtask]) -> String {
  if subtasks.is_empty() {
    return format!("{}\n       (no subtasks)", title);
  }
  let mut lines = vec![title.to_string()];
  lines.extend(
    subtasks
      .iter()
      .enumerate()
      .map(|(i, s)| render::subtask_line(i + 1, s)),
  );
  lines.join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::remote::fake::FakeGateway;
  use crate::sync::Severity;
  use chrono::TimeZone;

  fn config() -> Config {
    Config::from_yaml(
      "remote:\n  url: https://abc.supabase.co\ndisplay:\n  utc_offset_minutes: 0\n",
    )
    .unwrap()
  }

  fn app(gateway: &FakeGateway) -> App<FakeGateway, SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    App::new(gateway.clone(), store, &config())
  }

  fn list() -> Action {
    Action::List {
      expand: false,
      refresh: false,
    }
  }

  fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
  }

  #[tokio::test]
  async fn test_complete_and_reopen_round_trip() {
    let gateway = FakeGateway::new();
    gateway.seed_task("1", "A");
    gateway.seed_task("2", "B");
    gateway.set_completion_time(Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap());
    let mut app = app(&gateway);

    let listed = app.execute(list()).await.unwrap();
    assert!(listed.starts_with("  1. [ ] B"));

    let added = app
      .execute(Action::Add {
        text: words("C"),
        due: None,
      })
      .await
      .unwrap();
    assert_eq!(added, "Added: C");

    let done = app.execute(Action::Done { task: "3".into() }).await.unwrap();
    assert_eq!(done, "Completed: A");
    let titles: Vec<&str> = app.active.tasks().iter().map(|e| e.task.text.as_str()).collect();
    assert_eq!(titles, vec!["C", "B"]);

    let archive = app
      .execute(Action::Archive {
        from: None,
        to: None,
        refresh: false,
      })
      .await
      .unwrap();
    assert!(archive.contains("A  completed Wed, Jan 10 09:00"));

    let reopened = app.execute(Action::Reopen { task: "1".into() }).await.unwrap();
    assert_eq!(reopened, "Reopened: A");
    assert!(app.archive.all().is_empty());
    let ids: Vec<&str> = app.active.tasks().iter().map(|e| e.id().0.as_str()).collect();
    assert_eq!(ids.last(), Some(&"1"));
    assert!(!gateway.task("1").unwrap().completed);
  }

  #[tokio::test]
  async fn test_reopen_in_fresh_session_refetches_active_list() {
    let gateway = FakeGateway::new();
    gateway.seed_task("fresh", "Fresh");
    gateway.seed_completed("c", "Done", Some(Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()));

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut earlier = gateway.task("fresh").unwrap();
    earlier.id = TaskId::from("gone");
    earlier.text = "Gone".to_string();
    store
      .put_json(CacheKey::ActiveTasks, &vec![crate::sync::TaskEntry::new(earlier)])
      .unwrap();
    let mut app = App::new(gateway.clone(), store, &config());

    app.execute(Action::Reopen { task: "1".into() }).await.unwrap();

    let ids: Vec<&str> = app.active.tasks().iter().map(|e| e.id().0.as_str()).collect();
    assert!(ids.contains(&"fresh"));
    assert!(!ids.contains(&"gone"));
    assert_eq!(gateway.calls("list_active_tasks"), 1);
  }

  #[tokio::test]
  async fn test_archive_range_and_empty_state() {
    let gateway = FakeGateway::new();
    gateway.seed_completed("a", "done early", Some(Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap()));
    let mut app = app(&gateway);

    let out = app
      .execute(Action::Archive {
        from: NaiveDate::from_ymd_opt(2024, 2, 1),
        to: None,
        refresh: false,
      })
      .await
      .unwrap();
    assert_eq!(
      out,
      "Completed 2024-02-01 to ...\nNo completed tasks in the selected range."
    );
  }

  #[tokio::test]
  async fn test_task_references() {
    let gateway = FakeGateway::new();
    gateway.seed_task("abc123", "first");
    gateway.seed_task("abd456", "second");
    let mut app = app(&gateway);

    assert_eq!(app.resolve_active("2").await.unwrap(), TaskId::from("abc123"));
    assert_eq!(app.resolve_active("abd").await.unwrap(), TaskId::from("abd456"));
    assert!(app.resolve_active("ab").await.is_err());
    assert!(app.resolve_active("0").await.is_err());
    assert!(app.resolve_active("9").await.is_err());
  }

  #[tokio::test]
  async fn test_expand_all_loads_each_task_once() {
    let gateway = FakeGateway::new();
    gateway.seed_task("1", "A");
    gateway.seed_task("2", "B");
    gateway.seed_subtask("1", "s1", "a1");
    gateway.seed_subtask("2", "s2", "b1");
    gateway.seed_subtask("2", "s3", "b2");
    let mut app = app(&gateway);

    let out = app
      .execute(Action::List {
        expand: true,
        refresh: false,
      })
      .await
      .unwrap();
    app
      .execute(Action::List {
        expand: true,
        refresh: false,
      })
      .await
      .unwrap();

    assert!(out.contains("(0/2)"));
    assert!(out.contains("b2"));
    assert_eq!(gateway.calls("list_subtasks"), 2);
  }

  #[tokio::test]
  async fn test_subtask_commands_by_position() {
    let gateway = FakeGateway::new();
    gateway.seed_task("1", "A");
    gateway.seed_subtask("1", "s1", "first");
    let mut app = app(&gateway);

    app
      .execute(Action::Sub(SubAction::Add {
        task: "1".into(),
        text: words("second step"),
      }))
      .await
      .unwrap();
    let out = app
      .execute(Action::Sub(SubAction::Toggle {
        task: "1".into(),
        subtask: "2".into(),
      }))
      .await
      .unwrap();

    assert!(out.contains("2. [x] second step"));
    assert_eq!(gateway.calls("list_subtasks"), 1);
  }

  #[tokio::test]
  async fn test_offline_list_reports_degraded_mode() {
    let gateway = FakeGateway::new();
    gateway.seed_task("1", "A");
    let mut app = app(&gateway);
    app.execute(list()).await.unwrap();
    app.take_notices();

    gateway.set_offline(true);
    let out = app
      .execute(Action::List {
        expand: false,
        refresh: true,
      })
      .await
      .unwrap();

    assert!(out.contains("A"));
    let notices = app.take_notices();
    assert_eq!(notices[0].title, "Offline mode");
    assert_eq!(notices[0].severity, Severity::Destructive);
    assert!(app.status().contains("(offline)"));
  }

  #[tokio::test]
  async fn test_unreachable_store_without_cache_is_an_error() {
    let gateway = FakeGateway::new();
    gateway.set_offline(true);
    let mut app = app(&gateway);

    assert!(app.execute(list()).await.is_err());
    assert_eq!(app.take_notices()[0].title, "Connection error");
  }

  #[tokio::test]
  async fn test_edit_keeps_due_unless_given() {
    let gateway = FakeGateway::new();
    gateway.seed_task("1", "A");
    let mut app = app(&gateway);
    app
      .execute(Action::Edit {
        task: "1".into(),
        text: words("A"),
        due: Some("2024-05-01".into()),
      })
      .await
      .unwrap();

    app
      .execute(Action::Edit {
        task: "1".into(),
        text: words("A renamed"),
        due: None,
      })
      .await
      .unwrap();

    let task = gateway.task("1").unwrap();
    assert_eq!(task.text, "A renamed");
    assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
  }

  #[tokio::test]
  async fn test_status_reports_session_and_fetch() {
    let gateway = FakeGateway::new();
    let mut app = app(&gateway);
    assert!(app.status().contains("not started"));

    app.execute(list()).await.unwrap();
    let status = app.status();
    assert!(!status.contains("not started"));
    assert!(!status.contains("never"));
  }
}
