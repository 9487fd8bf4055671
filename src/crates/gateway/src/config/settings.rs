//! Resolved per-instance settings.

use crate::config::schema::*;
use crate::error::{GatewayError, Result};
use crate::history::HistoryLimits;
use crate::retry::RetryPolicy;
use llm::{ProviderConfig, ProviderKind};
use std::time::Duration;

/// Validated configuration snapshot for one instance.
///
/// The engine keeps this behind a lock and clones it at dispatch, so a
/// settings change is seen by the next job and never by one in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSettings {
    pub name: String,
    pub provider: ProviderKind,
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub request_interval: Duration,
    pub context_messages: usize,
    pub max_history_entries: usize,
    pub max_history_bytes: u64,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl InstanceSettings {
    /// Check every numeric range and the retry policy.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        let fail = |msg: String| Err(GatewayError::Config(format!("{}: {}", self.name, msg)));

        if self.api_key.trim().is_empty() {
            return fail("api_key must not be empty".into());
        }
        if self.model.trim().is_empty() {
            return fail("model must not be empty".into());
        }
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&self.temperature) {
            return fail(format!(
                "temperature {} outside {}..={}",
                self.temperature, MIN_TEMPERATURE, MAX_TEMPERATURE
            ));
        }
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            return fail(format!(
                "max_tokens {} outside {}..={}",
                self.max_tokens, MIN_MAX_TOKENS, MAX_MAX_TOKENS
            ));
        }
        if !(MIN_CONTEXT_MESSAGES..=MAX_CONTEXT_MESSAGES).contains(&self.context_messages) {
            return fail(format!(
                "context_messages {} outside {}..={}",
                self.context_messages, MIN_CONTEXT_MESSAGES, MAX_CONTEXT_MESSAGES
            ));
        }
        if !(MIN_HISTORY_ENTRIES..=MAX_HISTORY_ENTRIES).contains(&self.max_history_entries) {
            return fail(format!(
                "max_history_entries {} outside {}..={}",
                self.max_history_entries, MIN_HISTORY_ENTRIES, MAX_HISTORY_ENTRIES
            ));
        }
        if self.max_history_bytes < MIN_HISTORY_BYTES {
            return fail(format!(
                "max_history_bytes must be at least {}",
                MIN_HISTORY_BYTES
            ));
        }

        self.retry
            .validate()
            .map_err(|msg| GatewayError::Config(format!("{}: {}", self.name, msg)))
    }

    /// Connection settings for the provider client.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(self.provider, self.api_key.clone(), self.endpoint.clone())
            .with_timeout(self.request_timeout)
    }

    /// True when switching to `other` requires a new provider client.
    pub fn connection_changed(&self, other: &InstanceSettings) -> bool {
        self.provider != other.provider
            || self.endpoint != other.endpoint
            || self.api_key != other.api_key
            || self.request_timeout != other.request_timeout
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_entries: self.max_history_entries,
            max_bytes: self.max_history_bytes,
        }
    }

    /// Terminal deadline for a job submitted under these settings.
    pub fn job_deadline(&self) -> Duration {
        self.retry
            .job_deadline(self.request_timeout, self.request_interval)
    }
}

/// Partial settings change; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<Option<String>>,
    pub request_interval: Option<Duration>,
    pub context_messages: Option<usize>,
    pub max_history_entries: Option<usize>,
    pub max_history_bytes: Option<u64>,
    pub request_timeout: Option<Duration>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub retry: Option<RetryPolicy>,
}

impl SettingsUpdate {
    /// Produce the updated settings without touching `current`.
    pub fn apply_to(&self, current: &InstanceSettings) -> Result<InstanceSettings> {
        let mut next = current.clone();
        if let Some(ref model) = self.model {
            next.model = model.clone();
        }
        if let Some(t) = self.temperature {
            next.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            next.max_tokens = m;
        }
        if let Some(ref prompt) = self.system_prompt {
            next.system_prompt = prompt.clone().filter(|p| !p.trim().is_empty());
        }
        if let Some(i) = self.request_interval {
            next.request_interval = i;
        }
        if let Some(c) = self.context_messages {
            next.context_messages = c;
        }
        if let Some(e) = self.max_history_entries {
            next.max_history_entries = e;
        }
        if let Some(b) = self.max_history_bytes {
            next.max_history_bytes = b;
        }
        if let Some(t) = self.request_timeout {
            next.request_timeout = t;
        }
        if let Some(ref key) = self.api_key {
            next.api_key = key.clone();
        }
        if let Some(ref endpoint) = self.endpoint {
            next.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(ref retry) = self.retry {
            next.retry = retry.clone();
        }
        next.validate()?;
        Ok(next)
    }
}
