//! Core data-gateway primitives shared across crates.
//!
//! Includes entity identity, state/status/message enums, buffer handles,
//! route keys, and the base error type.

pub mod error;
pub mod types;

pub use error::DgwError;
pub use types::{
    BufferHandle, Direction, EntityKey, EntityKind, FsmState, FsmStatus, GroupPolicy,
    MessageKind, QueueType, RouteKey, TableIndex,
};
