//! Configuration loader
//!
//! Looks for the gateway config in this order and stops at the first hit:
//! 1. An explicit path passed on the command line
//! 2. Project-level config: ./.text-ai-gateway/gateway.toml
//! 3. User-level config: ~/.text-ai-gateway/gateway.toml
//!
//! With no file present the defaults are used (no instances).

use crate::config::schema::GatewayConfig;
use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_DIR: &str = ".text-ai-gateway";
const CONFIG_FILE: &str = "gateway.toml";

/// Base directory for user-level gateway files (~/.text-ai-gateway)
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

/// Configuration loader over the explicit, project and user locations
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    user_config_path: PathBuf,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            user_config_path: base_dir().join(CONFIG_FILE),
            project_config_path: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(CONFIG_DIR)
                .join(CONFIG_FILE),
        }
    }

    /// Use this file instead of searching the default locations
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// Path that `load` would read, if any
    pub fn resolved_path(&self) -> Option<&Path> {
        if let Some(ref path) = self.explicit_path {
            return Some(path.as_path());
        }
        [&self.project_config_path, &self.user_config_path]
            .into_iter()
            .find(|p| p.exists())
            .map(|p| p.as_path())
    }

    /// Load the configuration and expand environment variables
    pub async fn load(&self) -> Result<GatewayConfig> {
        let mut config = match self.resolved_path() {
            Some(path) => {
                let config = Self::load_from_path(path).await?;
                info!(path = %path.display(), instances = config.instances.len(), "Loaded configuration");
                config
            }
            None => {
                debug!(
                    user = %self.user_config_path.display(),
                    project = %self.project_config_path.display(),
                    "No config file found, using defaults"
                );
                GatewayConfig::default()
            }
        };

        config.resolve_env_vars();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub async fn load_from_path(path: &Path) -> Result<GatewayConfig> {
        if !path.exists() {
            return Err(GatewayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get user config path
    pub fn user_config_path(&self) -> &Path {
        &self.user_config_path
    }

    /// Get project config path
    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            [logging]
            level = "debug"
            format = "json"

            [[instances]]
            name = "office"
            provider = "openai"
            api_key = "k"
            "#,
        )
        .unwrap();

        let loader = ConfigLoader::new().with_path(&path);
        assert_eq!(loader.resolved_path(), Some(path.as_path()));

        let config = loader.load().await.unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.instances.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_error() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new().with_path(dir.path().join("absent.toml"));
        assert!(matches!(loader.load().await, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[[instances]\nname=").unwrap();

        let err = ConfigLoader::load_from_path(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_default_paths() {
        let loader = ConfigLoader::new();
        assert!(loader.user_config_path().ends_with(".text-ai-gateway/gateway.toml"));
        assert!(loader.project_config_path().ends_with(".text-ai-gateway/gateway.toml"));
    }
}
