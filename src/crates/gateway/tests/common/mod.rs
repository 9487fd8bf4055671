//! Common test utilities and setup

#![allow(dead_code)]

use async_trait::async_trait;
use gateway::{InstanceConfig, InstanceEngine, InstanceSettings};
use llm::{LlmError, NormalizedRequest, NormalizedResponse, ProviderAdapter, ProviderKind, TokenUsage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

/// One call the scripted provider received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub request: NormalizedRequest,
}

/// Provider that answers from a script, then falls back to a canned answer.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<llm::Result<NormalizedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every call takes `delay` before it answers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_ok(self, text: &str) -> Self {
        self.script.lock().push_back(Ok(response(text, TokenUsage::new(12, 8))));
        self
    }

    /// Answer without any token usage.
    pub fn then_ok_without_usage(self, text: &str) -> Self {
        self.script.lock().push_back(Ok(response(text, TokenUsage::default())));
        self
    }

    pub fn then_ok_with_usage(self, text: &str, usage: TokenUsage) -> Self {
        self.script.lock().push_back(Ok(response(text, usage)));
        self
    }

    pub fn then_err(self, error: LlmError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|c| c.at).collect()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn send(&self, request: NormalizedRequest) -> llm::Result<NormalizedResponse> {
        let question = request.question().to_string();
        self.calls.lock().push(RecordedCall {
            at: Instant::now(),
            request,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(response(&format!("answer to {}", question), TokenUsage::new(12, 8))))
    }

    async fn check_connection(&self) -> llm::Result<()> {
        Ok(())
    }
}

pub fn response(text: &str, usage: TokenUsage) -> NormalizedResponse {
    NormalizedResponse {
        text: text.to_string(),
        usage,
        model: "gpt-4o-mini".to_string(),
        latency: Duration::from_millis(5),
    }
}

/// Instance config with no interval and no jitter.
pub fn test_config(name: &str) -> InstanceConfig {
    let mut config = InstanceConfig::new(name, "openai", "test-key");
    config.request_interval = 0.0;
    config.retry.jitter = 0.0;
    config
}

pub fn test_settings(name: &str) -> InstanceSettings {
    test_config(name).resolve().expect("valid test settings")
}

/// Start an engine whose provider calls go to `provider`.
pub fn start_engine(dir: &Path, settings: InstanceSettings, provider: Arc<ScriptedProvider>) -> InstanceEngine {
    InstanceEngine::builder(settings, dir)
        .adapter(provider)
        .start()
        .expect("Failed to start engine")
}

pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}
