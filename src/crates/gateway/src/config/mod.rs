//! Gateway configuration
//!
//! TOML file schema, the loader that finds it, and the resolved per-instance
//! settings the engine runs on.

pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::ConfigLoader;
pub use schema::{normalize_name, GatewayConfig, HistoryConfig, InstanceConfig, LoggingConfig};
pub use settings::{InstanceSettings, SettingsUpdate};
