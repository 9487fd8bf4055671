//! Error types for provider adapters.
//!
//! Every failure an adapter can produce is one of the eight classified kinds
//! below. Retry policy lives with the caller; adapters only classify.

use thiserror::Error;

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Classified provider failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// API key rejected or missing.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Provider asked us to slow down.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Prompt plus context does not fit the model's window.
    #[error("Context too long: {0}")]
    ContextTooLong(String),

    /// Model unknown, retired or not enabled for this key.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Provider is down for maintenance or overloaded.
    #[error("Service under maintenance: {0}")]
    Maintenance(String),

    /// Request did not complete in time.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Provider answered with something we could not interpret.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Connection-level failure or unexpected server error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Discriminant of [`LlmError`], handy for policy tables and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthError,
    RateLimited,
    ContextTooLong,
    ModelUnavailable,
    Maintenance,
    Timeout,
    MalformedResponse,
    TransportError,
}

impl ErrorKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "auth_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ContextTooLong => "context_too_long",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Maintenance => "maintenance",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::TransportError => "transport_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LlmError {
    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::AuthError(_) => ErrorKind::AuthError,
            LlmError::RateLimited(_) => ErrorKind::RateLimited,
            LlmError::ContextTooLong(_) => ErrorKind::ContextTooLong,
            LlmError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            LlmError::Maintenance(_) => ErrorKind::Maintenance,
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            LlmError::TransportError(_) => ErrorKind::TransportError,
        }
    }

    /// The provider-supplied detail text.
    pub fn message(&self) -> &str {
        match self {
            LlmError::AuthError(m)
            | LlmError::RateLimited(m)
            | LlmError::ContextTooLong(m)
            | LlmError::ModelUnavailable(m)
            | LlmError::Maintenance(m)
            | LlmError::Timeout(m)
            | LlmError::MalformedResponse(m)
            | LlmError::TransportError(m) => m,
        }
    }

    /// Check if a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::Maintenance(_)
                | LlmError::Timeout(_)
                | LlmError::TransportError(_)
                | LlmError::MalformedResponse(_)
        )
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, LlmError::AuthError(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else if err.is_decode() {
            LlmError::MalformedResponse(err.to_string())
        } else {
            LlmError::TransportError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::MalformedResponse(err.to_string())
    }
}
