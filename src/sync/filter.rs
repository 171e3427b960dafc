//! Completion-date filtering for the archive.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::remote::Task;

/// Inclusive calendar-day range with optional open ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
  from: Option<NaiveDate>,
  to: Option<NaiveDate>,
}

impl DateRange {
  /// Build a range; reversed bounds are swapped.
  pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
    match (from, to) {
      (Some(f), Some(t)) if f > t => Self {
        from: Some(t),
        to: Some(f),
      },
      _ => Self { from, to },
    }
  }

  pub fn from(&self) -> Option<NaiveDate> {
    self.from
  }

  pub fn to(&self) -> Option<NaiveDate> {
    self.to
  }

  pub fn is_empty(&self) -> bool {
    self.from.is_none() && self.to.is_none()
  }

  /// Whether a completion instant falls in the range, with day boundaries
  /// taken in `offset`. An empty range matches everything; a non-empty one
  /// never matches a task without a completion time.
  pub fn matches(&self, completed_at: Option<DateTime<Utc>>, offset: FixedOffset) -> bool {
    if self.is_empty() {
      return true;
    }
    let Some(at) = completed_at else {
      return false;
    };

    // start_of_day(from) <= at <= end_of_day(to), compared as local days
    let day = at.with_timezone(&offset).date_naive();
    self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
  }
}

/// The tasks of `all` whose completion falls in `range`, in their original order.
pub fn filter_completed(all: &[Task], range: &DateRange, offset: FixedOffset) -> Vec<Task> {
  all
    .iter()
    .filter(|task| range.matches(task.completed_at, offset))
    .cloned()
    .collect()
}
