//! Remote LLM provider implementations.
//!
//! One client per wire-format family:
//!
//! - **OpenAI** - OpenAI chat completions and compatible endpoints (DeepSeek, custom bases)
//! - **Claude** - Anthropic's messages API
//! - **Gemini** - Google's generateContent API

pub mod claude;
pub mod gemini;
pub mod openai;

pub use claude::ClaudeClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
