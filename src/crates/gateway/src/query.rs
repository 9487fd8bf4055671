//! Request and result models of the public surface.

use crate::config::schema::{
    MAX_CONTEXT_MESSAGES, MAX_MAX_TOKENS, MAX_TEMPERATURE, MIN_CONTEXT_MESSAGES, MIN_MAX_TOKENS,
    MIN_TEMPERATURE,
};
use crate::error::{GatewayError, Result};
use crate::history::HistoryRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest page `get_history` returns.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Per-call overrides of the instance settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskOverrides {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub context_messages: Option<usize>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AskOverrides {
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t) {
                return Err(GatewayError::InvalidRequest(format!("temperature {} out of range", t)));
            }
        }
        if let Some(m) = self.max_tokens {
            if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&m) {
                return Err(GatewayError::InvalidRequest(format!("max_tokens {} out of range", m)));
            }
        }
        if let Some(c) = self.context_messages {
            if !(MIN_CONTEXT_MESSAGES..=MAX_CONTEXT_MESSAGES).contains(&c) {
                return Err(GatewayError::InvalidRequest(format!("context_messages {} out of range", c)));
            }
        }
        if matches!(self.model.as_deref(), Some(m) if m.trim().is_empty()) {
            return Err(GatewayError::InvalidRequest("model override must not be empty".to_string()));
        }
        Ok(())
    }
}

/// A question addressed to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub instance: String,
    pub question: String,
    #[serde(flatten)]
    pub overrides: AskOverrides,
}

impl AskRequest {
    pub fn new(instance: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            question: question.into(),
            overrides: AskOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: AskOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Structured answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResult {
    pub response_text: String,
    pub tokens_used: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model_used: String,
    pub instance: String,
    pub question: String,
    pub timestamp: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the answer was produced but could not be fully persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl AskResult {
    /// Result for a record committed (or attempted) by the engine.
    pub fn from_record(record: &HistoryRecord) -> Self {
        Self {
            response_text: record.response.clone(),
            tokens_used: record.tokens.total,
            prompt_tokens: record.tokens.prompt,
            completion_tokens: record.tokens.completion,
            model_used: record.model.clone(),
            instance: record.instance.clone(),
            question: record.question.clone(),
            timestamp: record.timestamp.to_rfc3339(),
            success: record.success,
            error: record.error.clone(),
            warning: None,
        }
    }

    /// Failure that never reached the provider.
    pub fn rejected(instance: impl Into<String>, question: impl Into<String>, model: impl Into<String>, error: &GatewayError) -> Self {
        Self {
            response_text: String::new(),
            tokens_used: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            model_used: model.into(),
            instance: instance.into(),
            question: question.into(),
            timestamp: Utc::now().to_rfc3339(),
            success: false,
            error: Some(error.to_string()),
            warning: None,
        }
    }
}

/// Ordering of a history page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Read-only history query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub instance: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Case-insensitive; matches either the model that was requested or
    /// the id the provider answered with.
    #[serde(default)]
    pub filter_model: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_limit() -> usize {
    10
}

impl HistoryQuery {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            limit: default_limit(),
            filter_model: None,
            start_date: None,
            include_metadata: false,
            sort_order: SortOrder::default(),
        }
    }

    /// Filter, order and page `records` (given oldest first).
    pub fn apply<'a, I>(&self, records: I) -> Vec<HistoryEntry>
    where
        I: IntoIterator<Item = &'a HistoryRecord>,
        I::IntoIter: DoubleEndedIterator,
    {
        let limit = self.limit.clamp(1, MAX_HISTORY_LIMIT);
        let matches = |r: &&HistoryRecord| {
            self.filter_model
                .as_deref()
                .map_or(true, |m| r.matches_model(m))
                && self.start_date.map_or(true, |start| r.timestamp >= start)
        };

        let iter = records.into_iter();
        let selected: Vec<&HistoryRecord> = match self.sort_order {
            SortOrder::Newest => iter.rev().filter(matches).take(limit).collect(),
            SortOrder::Oldest => iter.filter(matches).take(limit).collect(),
        };

        selected
            .into_iter()
            .map(|r| HistoryEntry::project(r, self.include_metadata))
            .collect()
    }
}

/// One row of a history page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub question: String,
    pub response: String,
    #[serde(flatten)]
    pub metadata: Option<EntryMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub tokens_estimated: bool,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub sequence: u64,
}

impl HistoryEntry {
    fn project(record: &HistoryRecord, include_metadata: bool) -> Self {
        Self {
            timestamp: record.timestamp.to_rfc3339(),
            question: record.question.clone(),
            response: record.response.clone(),
            metadata: include_metadata.then(|| EntryMetadata {
                model: record.model.clone(),
                prompt_tokens: record.tokens.prompt,
                completion_tokens: record.tokens.completion,
                total_tokens: record.tokens.total,
                tokens_estimated: record.tokens.estimated,
                latency_ms: record.latency_ms,
                success: record.success,
                error: record.error.clone(),
                sequence: record.sequence,
            }),
        }
    }
}
