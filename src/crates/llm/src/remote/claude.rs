//! Anthropic Claude client implementation.
//!
//! The messages API keeps the system prompt outside the turn list, so system
//! messages are lifted into the `system` field before sending.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ChatMessage, NormalizedRequest, ProviderAdapter, ProviderConfig, ProviderKind};
//! use llm::remote::ClaudeClient;
//!
//! let config = ProviderConfig::with_default_endpoint(ProviderKind::Anthropic, "sk-ant-...");
//! let client = ClaudeClient::new(config)?;
//!
//! let request = NormalizedRequest::new("claude-3-5-haiku-latest", vec![ChatMessage::user("Hello!")]);
//! let response = client.send(request).await?;
//! ```

use crate::adapter::ProviderAdapter;
use crate::classify::{decode_json, error_from_response, http_client};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, NormalizedRequest, NormalizedResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client.
#[derive(Clone)]
pub struct ClaudeClient {
    config: ProviderConfig,
    client: Client,
}

impl ClaudeClient {
    /// Create a new Claude client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = http_client(&config)?;
        Ok(Self { config, client })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// Split system messages from the conversation.
    /// Multiple system messages are joined with a blank line.
    fn convert_messages(&self, messages: &[ChatMessage]) -> (Option<String>, Vec<ClaudeMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut claude_messages = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    system_prompt = Some(match system_prompt {
                        Some(existing) => format!("{}\n\n{}", existing, msg.content),
                        None => msg.content.clone(),
                    });
                }
                Role::User | Role::Assistant => claude_messages.push(ClaudeMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        (system_prompt, claude_messages)
    }

    fn convert_response(
        &self,
        request: &NormalizedRequest,
        claude_resp: ClaudeResponse,
        started: Instant,
    ) -> Result<NormalizedResponse> {
        let texts: Vec<String> = claude_resp
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text)
            .collect();

        if texts.is_empty() {
            return Err(LlmError::MalformedResponse(
                "response contains no text content".to_string(),
            ));
        }

        let usage = claude_resp
            .usage
            .map(|u| TokenUsage {
                prompt: u.input_tokens,
                completion: u.output_tokens,
                total: match (u.input_tokens, u.output_tokens) {
                    (Some(i), Some(o)) => Some(i + o),
                    _ => None,
                },
            })
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text: texts.join(""),
            usage,
            model: claude_resp.model.unwrap_or_else(|| request.model.clone()),
            latency: started.elapsed(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn send(&self, request: NormalizedRequest) -> Result<NormalizedResponse> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let (system, messages) = self.convert_messages(&request.messages);

        let req_body = ClaudeRequest {
            model: request.model.clone(),
            messages,
            system,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(model = %request.model, messages = req_body.messages.len(), "Claude messages call");

        let started = Instant::now();
        let response = self
            .authorize(self.client.post(&url))
            .json(&req_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let claude_resp: ClaudeResponse = decode_json(response).await?;
        self.convert_response(&request, claude_resp, started)
    }

    async fn check_connection(&self) -> Result<()> {
        let url = format!("{}/v1/models", self.config.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;

        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(error_from_response(response).await),
        }
    }
}

// Claude API types
#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ClaudeContent>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}
