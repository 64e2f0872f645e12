//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings file error: {0}")]
    Settings(#[from] toml::de::Error),

    /// Unknown vendor, malformed credential, bad argument. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another ingestion attempt-group is already running.
    #[error("Ingestion already in progress: {0}")]
    Concurrency(String),

    /// Malformed response, navigation failure, timeout. Retried with backoff.
    #[error("Collection failed (transient): {0}")]
    TransientCollection(String),

    /// Invalid credentials, blocked account. Never retried.
    #[error("Collection failed: {0}")]
    TerminalCollection(String),

    /// Historical rows violate a uniqueness constraint we tried to add.
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether a collection attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientCollection(_) | Error::Http(_) | Error::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::TransientCollection("timeout".into()).is_retryable());
        assert!(!Error::TerminalCollection("bad password".into()).is_retryable());
        assert!(!Error::Validation("unknown vendor".into()).is_retryable());
        assert!(!Error::Concurrency("busy".into()).is_retryable());
    }
}
