//! History record types.

use chrono::{DateTime, Utc};
use llm::TokenUsage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token counts attached to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    /// True when the counts come from the heuristic estimator.
    #[serde(default)]
    pub estimated: bool,
}

impl TokenCounts {
    /// Counts from provider-reported usage, filling each missing part from
    /// the given estimates.
    ///
    /// A missing total is prompt + completion. The counts are marked
    /// estimated when the prompt or completion part had to be filled in.
    pub fn from_usage(usage: &TokenUsage, estimated_prompt: u64, estimated_completion: u64) -> Self {
        let prompt = usage.prompt.unwrap_or(estimated_prompt);
        let completion = usage.completion.unwrap_or(estimated_completion);
        Self {
            prompt,
            completion,
            total: usage.total.unwrap_or(prompt + completion),
            estimated: usage.prompt.is_none() || usage.completion.is_none(),
        }
    }

    pub fn estimated(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
            estimated: true,
        }
    }
}

/// One question/answer exchange. Records are never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    /// Monotonic per instance; assigned by the store on append.
    #[serde(default)]
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub instance: String,
    pub question: String,
    pub response: String,
    /// Model id the provider answered with.
    pub model: String,
    /// Model the request asked for, kept when the provider echoes a different id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_model: Option<String>,
    #[serde(default)]
    pub tokens: TokenCounts,
    #[serde(default)]
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn success(
        instance: impl Into<String>,
        question: impl Into<String>,
        response: impl Into<String>,
        model: impl Into<String>,
        tokens: TokenCounts,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: Utc::now(),
            instance: instance.into(),
            question: question.into(),
            response: response.into(),
            model: model.into(),
            requested_model: None,
            tokens,
            latency_ms,
            success: true,
            error: None,
        }
    }

    pub fn failure(
        instance: impl Into<String>,
        question: impl Into<String>,
        model: impl Into<String>,
        error: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: Utc::now(),
            instance: instance.into(),
            question: question.into(),
            response: String::new(),
            model: model.into(),
            requested_model: None,
            tokens: TokenCounts::default(),
            latency_ms,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Remember the model the request asked for when it differs from `model`.
    pub fn requested(mut self, requested_model: &str) -> Self {
        if !self.model.eq_ignore_ascii_case(requested_model) {
            self.requested_model = Some(requested_model.to_string());
        }
        self
    }

    /// Case-insensitive match against the answered or the requested model.
    pub fn matches_model(&self, model: &str) -> bool {
        self.model.eq_ignore_ascii_case(model)
            || self
                .requested_model
                .as_deref()
                .is_some_and(|requested| requested.eq_ignore_ascii_case(model))
    }
}
