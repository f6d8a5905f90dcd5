use thiserror::Error;

/// Hardware queue access failure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum HalError {
    /// Queue no longer exists.
    #[error("queue does not exist")]
    NotExist,
    /// Inner hardware fault.
    #[error("inner hardware error")]
    Inner,
    /// Queue is at capacity.
    #[error("queue is full")]
    QueueFull,
    /// Queue has nothing to dequeue.
    #[error("queue is empty")]
    QueueEmpty,
    /// Owning device is gone.
    #[error("no such device")]
    NoDevice,
    /// Any other driver status code.
    #[error("hardware status code {0}")]
    Other(i32),
}

/// Decision service submission failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("decision service unavailable")]
    Unavailable,
    #[error("decision request rejected: {0}")]
    Rejected(String),
}
