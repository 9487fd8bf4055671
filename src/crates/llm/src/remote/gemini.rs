//! Google Gemini client implementation.
//!
//! Gemini wants strictly alternating `user`/`model` turns that start with a
//! user turn, and takes the system prompt as a separate instruction.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ChatMessage, NormalizedRequest, ProviderAdapter, ProviderConfig, ProviderKind};
//! use llm::remote::GeminiClient;
//!
//! let config = ProviderConfig::with_default_endpoint(ProviderKind::Gemini, "AIza...");
//! let client = GeminiClient::new(config)?;
//!
//! let request = NormalizedRequest::new("gemini-1.5-flash", vec![ChatMessage::user("Hello!")]);
//! let response = client.send(request).await?;
//! ```

use crate::adapter::ProviderAdapter;
use crate::classify::{decode_json, error_from_response, http_client};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, NormalizedRequest, NormalizedResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Placeholder opening turn for conversations that would otherwise start with the model.
const OPENING_USER_TURN: &str = "I need your assistance.";

/// Google Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: ProviderConfig,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = http_client(&config)?;
        Ok(Self { config, client })
    }

    /// Convert messages to Gemini contents plus an optional system instruction.
    fn convert_messages(&self, messages: &[ChatMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut system_lines: Vec<&str> = Vec::new();
        let mut contents: Vec<GeminiContent> = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::System => {
                    system_lines.push(&msg.content);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "model",
            };

            // Consecutive turns from the same side are merged.
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => {
                    if let Some(part) = last.parts.first_mut() {
                        part.text.push('\n');
                        part.text.push_str(&msg.content);
                    }
                }
                _ => contents.push(GeminiContent::text(Some(role), &msg.content)),
            }
        }

        if contents.first().map(|c| c.role.as_deref() != Some("user")).unwrap_or(true) {
            contents.insert(0, GeminiContent::text(Some("user"), OPENING_USER_TURN));
        }

        let system_instruction = if system_lines.is_empty() {
            None
        } else {
            Some(GeminiContent::text(None, &system_lines.join("\n")))
        };

        (system_instruction, contents)
    }

    fn convert_response(
        &self,
        request: &NormalizedRequest,
        gemini_resp: GeminiResponse,
        started: Instant,
    ) -> Result<NormalizedResponse> {
        let candidate = gemini_resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("Gemini API returned no candidates".to_string()))?;

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        if parts.is_empty() {
            return Err(LlmError::MalformedResponse(
                "Gemini API response contains no content parts".to_string(),
            ));
        }

        let text = parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");

        let usage = gemini_resp
            .usage_metadata
            .map(|u| {
                let total = u.total_token_count.or_else(|| match (u.prompt_token_count, u.candidates_token_count) {
                    (Some(p), Some(c)) => Some(p + c),
                    _ => None,
                });
                TokenUsage {
                    prompt: u.prompt_token_count,
                    completion: u.candidates_token_count,
                    total,
                }
            })
            .unwrap_or_default();

        Ok(NormalizedResponse {
            text,
            usage,
            model: gemini_resp.model_version.unwrap_or_else(|| request.model.clone()),
            latency: started.elapsed(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn send(&self, request: NormalizedRequest) -> Result<NormalizedResponse> {
        // Gemini API URL format: base_url/models/{model}:generateContent
        let url = format!("{}/models/{}:generateContent", self.config.base_url, request.model);

        let (system_instruction, contents) = self.convert_messages(&request.messages);

        let req_body = GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        debug!(model = %request.model, turns = req_body.contents.len(), "Gemini generateContent");

        // Gemini uses API key as query parameter
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.config.api_key)])
            .json(&req_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let gemini_resp: GeminiResponse = decode_json(response).await?;
        self.convert_response(&request, gemini_resp, started)
    }

    /// Gemini has no cheap authenticated request, so only the key's presence is checked.
    async fn check_connection(&self) -> Result<()> {
        if self.config.api_key.trim().is_empty() {
            return Err(LlmError::AuthError("Gemini API key is missing or empty".to_string()));
        }
        Ok(())
    }
}

// Gemini API types
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![GeminiPart { text: text.to_string() }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}
