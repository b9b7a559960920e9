use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Depth {depth} out of range (allowed 0..={max})")]
    DepthOutOfRange { depth: u32, max: u32 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("HTML parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MirrorError {
    /// True for errors raised before any network or filesystem work happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MirrorError::InvalidUrl(_) | MirrorError::DepthOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
