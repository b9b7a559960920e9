use std::time::Duration;
use thiserror::Error;
use webarchiver_mirror::MirrorError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("Snapshot index error: {0}")]
    Snapshot(String),

    #[error("No snapshots available for {0}")]
    NoSnapshots(String),

    #[error("Invalid snapshot timestamp {0:?}: expected YYYYMMDDHHMMSS")]
    InvalidTimestamp(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed snapshot index response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Post-mirror hook {hook} failed: {message}")]
    Hook { hook: &'static str, message: String },

    #[error("Archive run exceeded its deadline of {0:?}")]
    Deadline(Duration),

    #[error("Seed task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ArchiveError {
    /// Errors that retrying against the snapshot index cannot fix.
    pub fn is_validation(&self) -> bool {
        match self {
            ArchiveError::Mirror(e) => e.is_validation(),
            ArchiveError::InvalidTimestamp(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
