//! Text AI gateway
//!
//! A managed gateway between a home-automation host and remote LLM
//! providers. Every configured instance gets its own [`InstanceEngine`]:
//! a FIFO queue with a minimum request interval, a retry policy over
//! classified provider failures, a rotating on-disk conversation history and
//! an observable status.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway::{AskRequest, ConfigLoader, InstanceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load().await?;
//!     let registry = InstanceRegistry::from_config(&config)?;
//!
//!     let result = registry.ask(AskRequest::new("kitchen", "Is the oven on?")).await?;
//!     println!("{}", result.response_text);
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod health;
pub mod history;
pub mod query;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod tokens;

pub use config::{ConfigLoader, GatewayConfig, InstanceConfig, InstanceSettings, SettingsUpdate};
pub use engine::{EngineBuilder, InstanceEngine};
pub use error::{GatewayError, Result};
pub use health::{HealthReport, HealthStatus, InstanceCheck};
pub use history::{HistoryLimits, HistoryRecord, HistoryStore, HistoryWindow, TokenCounts};
pub use query::{AskOverrides, AskRequest, AskResult, HistoryEntry, HistoryQuery, SortOrder};
pub use registry::InstanceRegistry;
pub use retry::{RetryController, RetryDecision, RetryPolicy};
pub use scheduler::{JobHandle, RateLimiter, Scheduler};
pub use state::InstanceState;
pub use status::{InstanceMetrics, StatusSnapshot, StatusTransition};
pub use tokens::{HeuristicEstimator, TokenEstimator};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version_info() -> String {
    format!("text-ai-gateway v{}", VERSION)
}
