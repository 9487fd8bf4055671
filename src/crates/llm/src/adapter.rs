//! The adapter contract and the closed set of provider implementations.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;
use crate::remote::{ClaudeClient, GeminiClient, OpenAiClient};
use crate::types::{NormalizedRequest, NormalizedResponse};
use async_trait::async_trait;

/// Translate one normalized request into a provider call and back.
///
/// Implementations must not retry internally and must classify every failure
/// into one of the [`crate::LlmError`] kinds. They hold no per-request state,
/// so one adapter can be shared by every instance that talks to the same
/// provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Wire-format family of this adapter.
    fn kind(&self) -> ProviderKind;

    /// Perform a single chat-completion call.
    async fn send(&self, request: NormalizedRequest) -> Result<NormalizedResponse>;

    /// Verify that the endpoint is reachable and the credentials are accepted.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use llm::ProviderAdapter;
    ///
    /// match provider.check_connection().await {
    ///     Ok(()) => println!("Provider is online"),
    ///     Err(e) => println!("Provider check failed: {}", e),
    /// }
    /// ```
    async fn check_connection(&self) -> Result<()>;
}

/// One variant per provider family.
#[derive(Clone)]
pub enum Provider {
    OpenAi(OpenAiClient),
    Anthropic(ClaudeClient),
    Gemini(GeminiClient),
}

impl Provider {
    /// Build the client matching `config.kind`.
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        Ok(match config.kind {
            ProviderKind::OpenAi => Provider::OpenAi(OpenAiClient::new(config)?),
            ProviderKind::Anthropic => Provider::Anthropic(ClaudeClient::new(config)?),
            ProviderKind::Gemini => Provider::Gemini(GeminiClient::new(config)?),
        })
    }
}

#[async_trait]
impl ProviderAdapter for Provider {
    fn kind(&self) -> ProviderKind {
        match self {
            Provider::OpenAi(_) => ProviderKind::OpenAi,
            Provider::Anthropic(_) => ProviderKind::Anthropic,
            Provider::Gemini(_) => ProviderKind::Gemini,
        }
    }

    async fn send(&self, request: NormalizedRequest) -> Result<NormalizedResponse> {
        match self {
            Provider::OpenAi(client) => client.send(request).await,
            Provider::Anthropic(client) => client.send(request).await,
            Provider::Gemini(client) => client.send(request).await,
        }
    }

    async fn check_connection(&self) -> Result<()> {
        match self {
            Provider::OpenAi(client) => client.check_connection().await,
            Provider::Anthropic(client) => client.check_connection().await,
            Provider::Gemini(client) => client.check_connection().await,
        }
    }
}
