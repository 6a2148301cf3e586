use thiserror::Error;

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Directory API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error)
}

impl DirectoryError {
    /// Transient failures worth retrying. Authentication and 4xx API errors
    /// are permanent for the lifetime of a run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        if let Self::RateLimited {
            retry_after_seconds
        } = self
        {
            Some(*retry_after_seconds)
        } else {
            None
        }
    }
}
