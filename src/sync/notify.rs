//! One-shot user notifications.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Info,
  Destructive,
}

/// A short message for the user about a failure or a finished action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub title: String,
  pub message: String,
  pub severity: Severity,
}

/// Sending half of the notice channel.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  pub fn info(&self, title: &str, message: &str) {
    self.send(title, message, Severity::Info);
  }

  pub fn destructive(&self, title: &str, message: &str) {
    self.send(title, message, Severity::Destructive);
  }

  fn send(&self, title: &str, message: &str, severity: Severity) {
    // Ignore send errors - nobody may be listening
    let _ = self.tx.send(Notice {
      title: title.to_string(),
      message: message.to_string(),
      severity,
    });
  }
}

/// Drain everything currently queued on `rx`.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
  let mut notices = Vec::new();
  while let Ok(notice) = rx.try_recv() {
    notices.push(notice);
  }
  notices
}
