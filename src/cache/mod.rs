//! Local snapshot cache with offline support.
//!
//! This module provides:
//! - A durable key/value store for list snapshots and the last fetch time
//! - A volatile session marker and the staleness policy built on it
//! - A read-through layer that decides between snapshot and remote fetch

mod layer;
mod session;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use session::{Session, StalenessPolicy};
pub use storage::{CacheStore, NoopStore, SqliteStore};
pub use traits::{CacheKey, CacheResult, CacheSource};
