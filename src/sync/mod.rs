//! Synchronizers that keep in-memory lists, the remote store and the
//! local snapshots coherent.

mod active;
mod archive;
mod error;
mod filter;
mod notify;
mod op;

pub use active::{SubtaskFetch, SubtaskLoad, TaskEntry, TaskListSync};
pub use archive::ArchiveSync;
pub use error::SyncError;
pub use filter::{filter_completed, DateRange};
pub use notify::{drain, Notice, Notifier, Severity};
pub use op::{ListState, OpState, Signals};
