//! Configuration schema for the gateway

use crate::config::settings::InstanceSettings;
use crate::error::{GatewayError, Result};
use crate::retry::RetryPolicy;
use llm::config::DEFAULT_DEEPSEEK_ENDPOINT;
use llm::ProviderKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MIN_MAX_TOKENS: u32 = 1;
pub const MAX_MAX_TOKENS: u32 = 100_000;
pub const MIN_CONTEXT_MESSAGES: usize = 1;
pub const MAX_CONTEXT_MESSAGES: usize = 20;
pub const MIN_HISTORY_ENTRIES: usize = 1;
pub const MAX_HISTORY_ENTRIES: usize = 100;
pub const MIN_HISTORY_BYTES: u64 = 1024;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// History storage configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Configured instances
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,

    /// Log format: "compact", "pretty", "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// History storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory holding history files (relative to ~/.text-ai-gateway or absolute)
    pub directory: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: "history".to_string(),
        }
    }
}

/// One configured AI endpoint binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Unique instance name
    pub name: String,

    /// Provider: "openai", "anthropic", "deepseek", "gemini" or "custom"
    pub provider: String,

    /// API key (supports ${ENV_VAR} interpolation)
    pub api_key: String,

    /// API base URL; defaults to the provider's public endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (0.0-2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum response tokens (1-100000)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Optional system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Minimum seconds between two provider calls
    #[serde(default = "default_request_interval")]
    pub request_interval: f64,

    /// Prior exchanges included as context (1-20)
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Entries kept in the active history file (1-100)
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,

    /// Byte ceiling of the active history file
    #[serde(default = "default_max_history_bytes")]
    pub max_history_bytes: u64,

    /// Per-call HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_request_interval() -> f64 {
    1.0
}

fn default_context_messages() -> usize {
    5
}

fn default_max_history_entries() -> usize {
    50
}

fn default_max_history_bytes() -> u64 {
    1024 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

impl InstanceConfig {
    /// Minimal instance with defaults for everything but identity and credentials
    pub fn new(name: impl Into<String>, provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            api_key: api_key.into(),
            endpoint: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            request_interval: default_request_interval(),
            context_messages: default_context_messages(),
            max_history_entries: default_max_history_entries(),
            max_history_bytes: default_max_history_bytes(),
            request_timeout_secs: default_request_timeout(),
            retry: RetryPolicy::default(),
        }
    }

    /// Validate ranges and resolve into runtime settings
    pub fn resolve(&self) -> Result<InstanceSettings> {
        validate_name(&self.name)?;

        let kind: ProviderKind = self.provider.parse().map_err(GatewayError::Config)?;

        let endpoint = match &self.endpoint {
            Some(e) if !e.trim().is_empty() => e.trim().trim_end_matches('/').to_string(),
            _ if self.provider.eq_ignore_ascii_case("deepseek") => DEFAULT_DEEPSEEK_ENDPOINT.to_string(),
            _ => kind.default_endpoint().to_string(),
        };

        let request_interval = if self.request_interval.is_finite() && self.request_interval >= 0.0 {
            Duration::from_secs_f64(self.request_interval)
        } else {
            return Err(GatewayError::Config(format!(
                "{}: request_interval must be a non-negative number of seconds",
                self.name
            )));
        };

        let settings = InstanceSettings {
            name: self.name.clone(),
            provider: kind,
            endpoint,
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone().filter(|p| !p.trim().is_empty()),
            request_interval,
            context_messages: self.context_messages,
            max_history_entries: self.max_history_entries,
            max_history_bytes: self.max_history_bytes,
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            retry: self.retry.clone(),
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _\-]{0,63}$").expect("valid instance name pattern")
    })
}

/// Check that an instance name uses the allowed character set
pub fn validate_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(GatewayError::Config(format!(
            "invalid instance name {:?}: use 1-64 letters, digits, spaces, '_' or '-'",
            name
        )))
    }
}

/// Normalize an instance name into its lookup key.
///
/// Lowercases, replaces every run of non-alphanumeric characters with a single
/// underscore and trims underscores at both ends.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

impl GatewayConfig {
    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: GatewayConfig) {
        self.logging = other.logging;
        self.history = other.history;
        if !other.instances.is_empty() {
            self.instances = other.instances;
        }
    }

    /// Resolve environment variables in configuration values
    ///
    /// Supports ${VAR_NAME} syntax in api keys and endpoints
    pub fn resolve_env_vars(&mut self) {
        for instance in &mut self.instances {
            instance.api_key = Self::expand_env_var(&instance.api_key);
            if let Some(ref endpoint) = instance.endpoint {
                instance.endpoint = Some(Self::expand_env_var(endpoint));
            }
        }
    }

    /// Expand environment variable in a string
    fn expand_env_var(value: &str) -> String {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            std::env::var(var_name).unwrap_or_else(|_| value.to_string())
        } else {
            value.to_string()
        }
    }

    /// Validate every instance and the uniqueness of their normalized names
    pub fn validate(&self) -> Result<Vec<InstanceSettings>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.instances.len());

        for instance in &self.instances {
            let settings = instance.resolve()?;
            if !seen.insert(normalize_name(&settings.name)) {
                return Err(GatewayError::Config(format!(
                    "duplicate instance name: {}",
                    settings.name
                )));
            }
            resolved.push(settings);
        }

        Ok(resolved)
    }

    /// Get the resolved history directory
    ///
    /// If the path is relative, resolves it relative to ~/.text-ai-gateway
    pub fn history_dir(&self) -> PathBuf {
        let path = PathBuf::from(&self.history.directory);

        if path.is_absolute() {
            path
        } else {
            crate::config::loader::base_dir().join(path)
        }
    }
}
