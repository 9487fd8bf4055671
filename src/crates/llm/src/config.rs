//! Connection settings shared by all provider clients.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default OpenAI endpoint.
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
/// Default Anthropic endpoint.
pub const DEFAULT_ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com";
/// Default DeepSeek endpoint (OpenAI wire format).
pub const DEFAULT_DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com";
/// Default Gemini endpoint.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Wire-format family of a provider.
///
/// Closed on purpose: a new provider family is a new variant here and a new
/// client under [`crate::remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat completions and every compatible endpoint (DeepSeek, custom).
    #[serde(rename = "openai", alias = "deepseek", alias = "custom")]
    OpenAi,
    /// Anthropic messages API.
    #[serde(alias = "claude")]
    Anthropic,
    /// Google Gemini generateContent API.
    #[serde(alias = "google")]
    Gemini,
}

impl ProviderKind {
    /// Stable name used in logs and status snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Endpoint used when the configuration does not name one.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => DEFAULT_OPENAI_ENDPOINT,
            ProviderKind::Anthropic => DEFAULT_ANTHROPIC_ENDPOINT,
            ProviderKind::Gemini => DEFAULT_GEMINI_ENDPOINT,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" | "deepseek" | "custom" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Connection settings for one remote provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Wire-format family.
    pub kind: ProviderKind,

    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API, without a trailing slash.
    ///
    /// Examples:
    /// - OpenAI: "https://api.openai.com/v1"
    /// - Anthropic: "https://api.anthropic.com"
    /// - DeepSeek: "https://api.deepseek.com"
    /// - Gemini: "https://generativelanguage.googleapis.com/v1beta"
    pub base_url: String,

    /// Per-call timeout.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Create a configuration with the default timeout.
    pub fn new(kind: ProviderKind, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: default_timeout(),
        }
    }

    /// Create a configuration pointing at the provider's public endpoint.
    pub fn with_default_endpoint(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self::new(kind, api_key, kind.default_endpoint())
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Default per-call timeout.
pub fn default_timeout() -> Duration {
    Duration::from_secs(30)
}
