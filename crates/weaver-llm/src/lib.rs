//! Weaver LLM — provider trait and Anthropic streaming implementation

pub mod anthropic;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use types::{ChatMessage, LlmRequest, Role, StreamDelta};
