use thiserror::Error;

use super::retry::RetryError;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("event channel closed: {0}")]
    Channel(String),
    #[error("capture cancelled")]
    Cancelled,
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for CaptureError {
    fn from(err: tokio::task::JoinError) -> Self {
        CaptureError::Unexpected(err.to_string())
    }
}

impl From<RetryError<CaptureError>> for CaptureError {
    fn from(err: RetryError<CaptureError>) -> Self {
        match err {
            RetryError::Cancelled => CaptureError::Cancelled,
            RetryError::Operation(original) => original,
        }
    }
}
