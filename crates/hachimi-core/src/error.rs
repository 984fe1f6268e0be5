//! Error types for the Hachimi player engine.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the player engine.
#[derive(Error, Debug)]
pub enum Error {
    // Network errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] HttpError),

    #[error("Network error: {0}")]
    Network(String),

    // Audio errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // Lifecycle errors
    #[error("Backend initialization failed: {0}")]
    Initialization(String),

    #[error("Player is not initialized")]
    NotInitialized,

    #[error("Player has been released")]
    Released,

    #[error("Failed to prepare song {id}: {source}")]
    Prepare {
        id: String,
        #[source]
        source: Arc<Error>,
    },

    // Preference store errors
    #[error("Preference store error: {0}")]
    Preferences(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// HTTP-specific errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed with status {status}: {message}")]
    StatusError { status: u16, message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Returns true if this error is retryable.
    ///
    /// The player itself never retries; this is a hint for the caller's
    /// queue logic (retry the same song or skip to the next one).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Http(HttpError::ConnectionFailed(_) | HttpError::Timeout) => {
                true
            }
            Self::Http(HttpError::StatusError { status, .. }) => *status >= 500,
            Self::Prepare { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the error is a lifecycle violation rather than a
    /// playback failure.
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::NotInitialized | Self::Released)
    }
}
