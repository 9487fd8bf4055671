//! Provider adapters for the text AI gateway.
//!
//! Each adapter turns a [`NormalizedRequest`] into one HTTP call against a
//! chat-completion endpoint and maps the answer back into a
//! [`NormalizedResponse`]. Failures are classified into [`LlmError`] so the
//! caller can decide on retries without knowing which provider it talks to.
//!
//! # Providers
//!
//! - **OpenAI-compatible** - OpenAI, DeepSeek and any custom `/chat/completions` base
//! - **Anthropic** - Claude models over the messages API
//! - **Gemini** - Google's Gemini models
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use llm::{ChatMessage, NormalizedRequest, Provider, ProviderAdapter, ProviderConfig, ProviderKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfig::with_default_endpoint(ProviderKind::Anthropic, "sk-ant-...");
//!     let provider = Provider::from_config(config)?;
//!
//!     let request = NormalizedRequest::new(
//!         "claude-3-5-haiku-latest",
//!         vec![ChatMessage::user("Is the garage door open?")],
//!     )
//!     .with_temperature(0.7);
//!
//!     let response = provider.send(request).await?;
//!     println!("Response: {}", response.text);
//!
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod classify;
pub mod config;
pub mod error;
pub mod remote;
pub mod types;

// Re-export commonly used types
pub use adapter::{Provider, ProviderAdapter};
pub use config::{ProviderConfig, ProviderKind};
pub use error::{ErrorKind, LlmError, Result};
pub use types::{ChatMessage, NormalizedRequest, NormalizedResponse, Role, TokenUsage};
