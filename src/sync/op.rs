//! Explicit async state for lists and user-triggered operations.

/// State of a single kind of operation (refresh, submit, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OpState {
  /// Never started
  #[default]
  Idle,
  /// Started and not yet resolved
  InFlight,
  /// Last run succeeded
  Succeeded,
  /// Last run failed with the given message
  Failed(String),
}

impl OpState {
  pub fn is_in_flight(&self) -> bool {
    matches!(self, OpState::InFlight)
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      OpState::Failed(e) => Some(e),
      _ => None,
    }
  }

  /// Resolve from an operation result.
  pub fn settle<T, E: std::fmt::Display>(&mut self, result: &Result<T, E>) {
    *self = match result {
      Ok(_) => OpState::Succeeded,
      Err(e) => OpState::Failed(e.to_string()),
    };
  }
}

/// State of a synchronized list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ListState {
  /// Nothing requested yet
  #[default]
  Idle,
  /// A read is in progress
  Loading,
  /// The list is usable; `degraded` when served from cache while offline
  Ready { degraded: bool },
  /// Nothing could be loaded
  Error(String),
}

impl ListState {
  pub fn is_loading(&self) -> bool {
    matches!(self, ListState::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, ListState::Ready { .. })
  }

  pub fn is_degraded(&self) -> bool {
    matches!(self, ListState::Ready { degraded: true })
  }
}

/// Flags a front end renders from, derived from the state machines above.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
  pub loading: bool,
  pub refreshing: bool,
  pub submitting: bool,
  pub connection_error: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_settle_records_outcome() {
    let mut op = OpState::InFlight;
    op.settle::<(), _>(&Err("boom"));
    assert_eq!(op.error(), Some("boom"));

    op.settle::<_, String>(&Ok(1));
    assert_eq!(op, OpState::Succeeded);
    assert!(!op.is_in_flight());
  }

  #[test]
  fn test_degraded_is_ready() {
    let state = ListState::Ready { degraded: true };
    assert!(state.is_ready());
    assert!(state.is_degraded());
    assert!(!ListState::Ready { degraded: false }.is_degraded());
    assert!(!ListState::Loading.is_ready());
  }
}
