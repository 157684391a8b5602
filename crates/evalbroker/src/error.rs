use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("Worker host {0} failed: {1}")]
    HostFailure(u64, String),

    #[error("Worker host {0} did not become ready in time")]
    HostStartupTimeout(u64),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Outbound channel error: {0}")]
    Outbound(std::io::Error),

    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Errors that end the broker rather than a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Outbound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
