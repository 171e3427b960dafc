//! Access to the hosted task store.
//!
//! The synchronizers only see the [`RemoteGateway`] trait; [`RestGateway`]
//! is the HTTP implementation used by the binary.

pub mod api_types;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod gateway;
pub mod types;

pub use client::RestGateway;
pub use gateway::{GatewayError, GatewayResult, Health, RemoteGateway};
pub use types::{Subtask, SubtaskId, SubtaskPatch, Task, TaskId, TaskPatch};
