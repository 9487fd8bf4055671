//! Registry of running instances.

use crate::config::{normalize_name, GatewayConfig, InstanceSettings};
use crate::engine::InstanceEngine;
use crate::error::{GatewayError, Result};
use crate::health::{HealthReport, InstanceCheck};
use crate::query::{AskRequest, AskResult, HistoryEntry, HistoryQuery};
use crate::status::StatusSnapshot;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Prefix of the host entity id that may be used in place of a name.
const ENTITY_PREFIX: &str = "sensor.ha_text_ai_";

/// Lookup key for an instance name or `sensor.ha_text_ai_<name>` entity id.
pub fn lookup_key(id: &str) -> String {
    let trimmed = id.trim();
    let stripped = match trimmed.get(..ENTITY_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(ENTITY_PREFIX) => &trimmed[ENTITY_PREFIX.len()..],
        _ => trimmed,
    };
    normalize_name(stripped)
}

/// Owns every instance engine, keyed by normalized name.
pub struct InstanceRegistry {
    history_dir: PathBuf,
    engines: RwLock<BTreeMap<String, Arc<InstanceEngine>>>,
}

impl InstanceRegistry {
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
            engines: RwLock::new(BTreeMap::new()),
        }
    }

    /// Validate the configuration and start one engine per instance.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let settings = config.validate()?;
        let registry = Self::new(config.history_dir());
        for instance in settings {
            registry.add(instance)?;
        }
        info!(instances = registry.len(), "Registry initialized");
        Ok(registry)
    }

    pub fn history_dir(&self) -> &PathBuf {
        &self.history_dir
    }

    /// Start an engine for `settings` with the provider built from them.
    pub fn add(&self, settings: InstanceSettings) -> Result<Arc<InstanceEngine>> {
        let key = lookup_key(&settings.name);
        if self.engines.read().contains_key(&key) {
            return Err(GatewayError::Config(format!("instance {} already exists", settings.name)));
        }
        let engine = InstanceEngine::builder(settings, &self.history_dir).start()?;
        self.insert(engine)
    }

    /// Register an engine that was built elsewhere.
    pub fn insert(&self, engine: InstanceEngine) -> Result<Arc<InstanceEngine>> {
        let key = lookup_key(engine.name());
        let mut engines = self.engines.write();
        if engines.contains_key(&key) {
            return Err(GatewayError::Config(format!("instance {} already exists", engine.name())));
        }
        let engine = Arc::new(engine);
        engines.insert(key, Arc::clone(&engine));
        info!(instance = %engine.name(), "Instance registered");
        Ok(engine)
    }

    /// Shut an instance down and forget it. Its history files stay on disk.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let engine = self
            .engines
            .write()
            .remove(&lookup_key(id))
            .ok_or_else(|| GatewayError::InvalidInstance(id.to_string()))?;
        engine.shutdown().await;
        info!(instance = %engine.name(), "Instance removed");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<InstanceEngine>> {
        self.engines
            .read()
            .get(&lookup_key(id))
            .cloned()
            .ok_or_else(|| GatewayError::InvalidInstance(id.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.read().values().map(|e| e.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AskResult> {
        let engine = self.get(&request.instance)?;
        Ok(engine.ask(request.question, request.overrides).await)
    }

    pub fn set_system_prompt(&self, id: &str, prompt: Option<String>) -> Result<()> {
        self.get(id)?.set_system_prompt(prompt)
    }

    pub async fn clear_history(&self, id: &str) -> Result<()> {
        self.get(id)?.clear_history().await
    }

    pub async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        Ok(self.get(&query.instance)?.get_history(query).await)
    }

    pub fn status(&self, id: &str) -> Result<StatusSnapshot> {
        Ok(self.get(id)?.status())
    }

    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        self.engines.read().values().map(|e| e.status()).collect()
    }

    /// Check every provider connection concurrently.
    pub async fn check_connections(&self) -> HealthReport {
        let engines: Vec<_> = self.engines.read().values().cloned().collect();

        let checks = join_all(engines.iter().map(|engine| async move {
            let start = Instant::now();
            let result = engine.check_connection().await;
            InstanceCheck::from_result(engine.name(), &result, start.elapsed().as_millis() as u64)
        }))
        .await;

        HealthReport::new(checks)
    }

    /// Shut every instance down.
    pub async fn shutdown(&self) {
        let engines: Vec<_> = std::mem::take(&mut *self.engines.write()).into_values().collect();
        join_all(engines.iter().map(|e| e.shutdown())).await;
        info!(instances = engines.len(), "Registry shut down");
    }
}
