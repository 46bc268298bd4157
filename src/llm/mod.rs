pub mod anthropic;
pub mod client;
pub mod provider;
pub mod queue;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use client::{LlmClient, UsageStats, compress_history, llm_error_to_message};
pub use provider::{LLMProvider, LlmError, LlmResult, StreamResponse};
pub use queue::LlmRequestQueue;
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageRole, StreamChunk, TokenUsage,
};
