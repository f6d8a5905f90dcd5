use std::path::PathBuf;

use dgw_core::DgwError;
use thiserror::Error;

/// Failures while loading or running a scenario.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read scenario {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("duplicate entity name: {0}")]
    DuplicateName(String),
    #[error("unknown entity name: {0}")]
    UnknownName(String),
    #[error("queue {device}/{id} declared twice")]
    DuplicateQueue { device: u32, id: u32 },
    #[error("scenario rejected: {0}")]
    Dispatch(#[from] DgwError),
}
