//! OpenAI-compatible client implementation.
//!
//! Covers OpenAI itself and every endpoint speaking the same
//! `/chat/completions` dialect (DeepSeek, self-hosted proxies, custom bases).
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ChatMessage, NormalizedRequest, ProviderAdapter, ProviderConfig, ProviderKind};
//! use llm::remote::OpenAiClient;
//!
//! let config = ProviderConfig::with_default_endpoint(ProviderKind::OpenAi, "sk-...");
//! let client = OpenAiClient::new(config)?;
//!
//! let request = NormalizedRequest::new("gpt-4o-mini", vec![ChatMessage::user("Hello!")]);
//! let response = client.send(request).await?;
//! ```

use crate::adapter::ProviderAdapter;
use crate::classify::{decode_json, error_from_response, http_client};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, NormalizedRequest, NormalizedResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct OpenAiClient {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = http_client(&config)?;
        Ok(Self { config, client })
    }

    fn build_body(&self, request: &NormalizedRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }

    fn convert_response(
        &self,
        request: &NormalizedRequest,
        openai_resp: OpenAiResponse,
        started: Instant,
    ) -> Result<NormalizedResponse> {
        let choice = openai_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("response contains no choices".to_string()))?;

        let text = choice
            .message
            .content
            .ok_or_else(|| LlmError::MalformedResponse("choice has no message content".to_string()))?;

        let usage = openai_resp
            .usage
            .map(|u| TokenUsage {
                prompt: u.prompt_tokens,
                completion: u.completion_tokens,
                total: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text,
            usage,
            model: openai_resp.model.unwrap_or_else(|| request.model.clone()),
            latency: started.elapsed(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn send(&self, request: NormalizedRequest) -> Result<NormalizedResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = self.build_body(&request);

        debug!(model = %request.model, messages = body.messages.len(), "OpenAI chat completion");

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let openai_resp: OpenAiResponse = decode_json(response).await?;
        self.convert_response(&request, openai_resp, started)
    }

    async fn check_connection(&self) -> Result<()> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        // Some compatible servers do not expose /models; reaching them is enough.
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(error_from_response(response).await),
        }
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: Option<String>,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
