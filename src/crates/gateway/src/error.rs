//! Error types for the gateway.
//!
//! Provider failures come from [`llm::LlmError`] and are wrapped here so a
//! job outcome can carry either a provider or a gateway-side reason.

use llm::LlmError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for gateway operations.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Classified provider failure that ended a job.
    #[error(transparent)]
    Provider(#[from] LlmError),

    /// A history record could not be committed.
    #[error("History storage error: {0}")]
    Storage(String),

    /// Evicted records could not be archived; the active store was still truncated.
    #[error("History rotation error: {0}")]
    HistoryRotation(String),

    /// The history file or directory cannot be read or created.
    #[error("History file access error at {path}: {message}")]
    HistoryFileAccess { path: PathBuf, message: String },

    /// Unknown instance identifier.
    #[error("Instance {0} not found")]
    InvalidInstance(String),

    /// The request itself is unusable (blank question, bad override).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration or settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job cancelled before it was dispatched.
    #[error("Request cancelled before dispatch")]
    Cancelled,

    /// Job outlived its terminal deadline.
    #[error("Request deadline of {deadline_secs:.1}s exceeded")]
    DeadlineExceeded { deadline_secs: f64 },

    /// The instance is shutting down and no longer accepts work.
    #[error("Instance {0} is shut down")]
    ShutDown(String),
}

impl GatewayError {
    /// Build a file-access error from an I/O failure.
    pub fn file_access(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        GatewayError::HistoryFileAccess {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// The provider error, if this failure came from the provider.
    pub fn as_provider(&self) -> Option<&LlmError> {
        match self {
            GatewayError::Provider(err) => Some(err),
            _ => None,
        }
    }

    /// Short machine-readable name of the failure.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Provider(err) => err.kind().as_str(),
            GatewayError::Storage(_) => "storage_error",
            GatewayError::HistoryRotation(_) => "history_rotation_error",
            GatewayError::HistoryFileAccess { .. } => "history_file_access_error",
            GatewayError::InvalidInstance(_) => "invalid_instance",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Config(_) => "config_error",
            GatewayError::Cancelled => "cancelled",
            GatewayError::DeadlineExceeded { .. } => "timeout",
            GatewayError::ShutDown(_) => "shut_down",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Storage(err.to_string())
    }
}
