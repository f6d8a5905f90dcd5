use thiserror::Error;

use crate::types::EntityKey;

/// Shared lightweight error type for dispatcher control-plane operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DgwError {
    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The referenced entity is not registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityKey),
    /// The referenced group has no registered member list.
    #[error("unknown group: {0}")]
    UnknownGroup(u32),
}
