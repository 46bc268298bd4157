use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::types::{CompletionRequest, CompletionResponse, StreamChunk};

/// Typed failure taxonomy for LLM requests. The agent loop branches on the
/// variant rather than string-matching provider error messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("authentication invalid: {0}")]
    AuthInvalid(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),
    #[error("content policy violation: {0}")]
    ContentPolicy(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("other LLM error: {0}")]
    Other(String),
}

impl LlmError {
    /// Whether a retry of the same request might succeed without operator
    /// intervention (used by the request queue's backoff policy).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ServiceUnavailable(_) | LlmError::Timeout(_) | LlmError::Connection(_)
        )
    }
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

pub type StreamResponse = Pin<Box<dyn Stream<Item = LlmResult<StreamChunk>> + Send>>;

/// Trait implemented by concrete LLM backends.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Complete a prompt and return the full response.
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Stream a completion response.
    async fn stream(&self, request: CompletionRequest) -> LlmResult<StreamResponse>;

    /// Context window limit, in tokens, for this provider/model.
    fn context_limit(&self) -> usize;

    /// Whether this provider honours tool/function calling conventions.
    fn supports_tools(&self) -> bool;

    /// Whether this provider accepts image content blocks. When false, the
    /// client replaces image chunks with a text placeholder before sending.
    fn supports_vision(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str;

    /// Pre-establish connection to provider. Default no-op; providers may override.
    async fn warmup(&self) -> LlmResult<()> {
        Ok(())
    }
}
