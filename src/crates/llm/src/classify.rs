//! Mapping of HTTP outcomes onto the [`LlmError`] taxonomy.
//!
//! All three wire clients share these rules so the retry controller sees the
//! same classification no matter which provider produced the failure.

use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use reqwest::{Client, Response, StatusCode};

const CONTEXT_MARKERS: &[&str] = &[
    "context_length",
    "context length",
    "maximum context",
    "too many tokens",
    "prompt is too long",
    "input is too long",
    "exceeds the maximum",
];

const MODEL_MARKERS: &[&str] = &[
    "model_not_found",
    "does not exist",
    "unknown model",
    "invalid model",
    "model not found",
    "is not supported",
];

const MAINTENANCE_MARKERS: &[&str] = &["maintenance", "overloaded"];

/// Build the shared HTTP client for a provider.
pub(crate) fn http_client(config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| LlmError::TransportError(format!("failed to build HTTP client: {}", e)))
}

/// Classify a non-success status together with its body text.
pub fn classify_status(status: StatusCode, body: &str) -> LlmError {
    let lowered = body.to_ascii_lowercase();
    let detail = format!("{}: {}", status, body.trim());

    match status.as_u16() {
        401 | 403 => LlmError::AuthError(detail),
        429 => LlmError::RateLimited(detail),
        503 | 529 => LlmError::Maintenance(detail),
        408 | 504 => LlmError::Timeout(detail),
        404 => LlmError::ModelUnavailable(detail),
        400 | 413 | 422 => {
            if contains_any(&lowered, CONTEXT_MARKERS) {
                LlmError::ContextTooLong(detail)
            } else if contains_any(&lowered, MODEL_MARKERS) {
                LlmError::ModelUnavailable(detail)
            } else {
                LlmError::MalformedResponse(detail)
            }
        }
        s if s >= 500 => {
            if contains_any(&lowered, MAINTENANCE_MARKERS) {
                LlmError::Maintenance(detail)
            } else {
                LlmError::TransportError(detail)
            }
        }
        _ => LlmError::MalformedResponse(detail),
    }
}

/// Drain an unsuccessful response into a classified error.
pub(crate) async fn error_from_response(response: Response) -> LlmError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_status(status, &body)
}

/// Decode a JSON body, classifying decode failures as malformed.
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| LlmError::MalformedResponse(e.to_string()))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
