//! Anthropic Messages API client — the concrete [`LLMProvider`] the Scan
//! Controller wires up by default.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::provider::{LLMProvider, LlmError, LlmResult, StreamResponse};
use super::types::{CompletionRequest, CompletionResponse, ContentBlock, Message, MessageRole, StreamChunk, TokenUsage};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    context_limit: usize,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, api_base: Option<String>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder().timeout(request_timeout).build().unwrap_or_default();
        Self { http, api_key: api_key.into(), api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()), context_limit: 200_000 }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.api_base.trim_end_matches('/'))
    }

    fn to_wire(&self, request: &CompletionRequest) -> (Option<String>, Vec<WireMessage>) {
        let mut system = None;
        let mut messages = Vec::new();
        for msg in &request.messages {
            match msg.role {
                MessageRole::System => system = Some(msg.text()),
                MessageRole::User => messages.push(WireMessage { role: "user", content: to_wire_blocks(msg) }),
                MessageRole::Assistant => messages.push(WireMessage { role: "assistant", content: to_wire_blocks(msg) }),
            }
        }
        (system, messages)
    }

    async fn classify_response(resp: reqwest::Response) -> LlmError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => LlmError::AuthInvalid(body),
            404 => LlmError::ModelNotFound(body),
            413 | 400 if body.contains("context") || body.contains("token") => LlmError::ContextLengthExceeded(body),
            400 => LlmError::BadRequest(body),
            429 => LlmError::RateLimited(body),
            451 => LlmError::ContentPolicy(body),
            500..=599 => LlmError::ServiceUnavailable(body),
            _ => LlmError::Other(format!("unexpected status {status}: {body}")),
        }
    }

    fn classify_transport(err: &reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else if err.is_connect() {
            LlmError::Connection(err.to_string())
        } else {
            LlmError::Other(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<WireCacheControl>,
    },
    Image {
        source: WireImageSource,
    },
}

#[derive(Serialize, Deserialize)]
struct WireCacheControl {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize, Deserialize)]
struct WireImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

fn to_wire_blocks(msg: &Message) -> Vec<WireBlock> {
    msg.content
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text, cache_control } => WireBlock::Text {
                text: text.clone(),
                cache_control: cache_control.then(|| WireCacheControl { kind: "ephemeral".to_string() }),
            },
            ContentBlock::Image { data, media_type } => {
                WireBlock::Image { source: WireImageSource { kind: "base64".to_string(), media_type: media_type.clone(), data: data.clone() } }
            }
        })
        .collect()
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    model: String,
    usage: Option<ResponseUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: StreamDelta },
    MessageDelta { delta: StreamMessageDelta },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let (system, messages) = self.to_wire(&request);
        let body = json!({
            "model": request.model,
            "system": system,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stop_sequences": request.stop,
        });

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        if !resp.status().is_success() {
            return Err(Self::classify_response(resp).await);
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| LlmError::Other(e.to_string()))?;
        let mut content = String::new();
        let mut thinking_blocks = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Text { text } => content.push_str(&text),
                ResponseBlock::Thinking { thinking } => thinking_blocks.push(thinking),
                ResponseBlock::Other => {}
            }
        }

        Ok(CompletionResponse {
            content,
            thinking_blocks,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                cached_tokens: u.cache_read_input_tokens,
                cache_creation_tokens: u.cache_creation_input_tokens,
            }),
            finish_reason: parsed.stop_reason,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> LlmResult<StreamResponse> {
        let (system, messages) = self.to_wire(&request);
        let body = json!({
            "model": request.model,
            "system": system,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stop_sequences": request.stop,
            "stream": true,
        });

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        if !resp.status().is_success() {
            return Err(Self::classify_response(resp).await);
        }

        let events = resp.bytes_stream().eventsource();
        let stream = events.filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => return Some(Err(LlmError::Connection(e.to_string()))),
            };
            match serde_json::from_str::<StreamEvent>(&event.data) {
                Ok(StreamEvent::ContentBlockDelta { delta }) => Some(Ok(StreamChunk {
                    delta: delta.text.unwrap_or_default(),
                    is_final: false,
                    finish_reason: None,
                })),
                Ok(StreamEvent::MessageDelta { delta }) => Some(Ok(StreamChunk {
                    delta: String::new(),
                    is_final: false,
                    finish_reason: delta.stop_reason,
                })),
                Ok(StreamEvent::MessageStop) => Some(Ok(StreamChunk {
                    delta: String::new(),
                    is_final: true,
                    finish_reason: Some("stop".to_string()),
                })),
                Ok(StreamEvent::Other) => None,
                Err(e) => Some(Err(LlmError::Other(format!("malformed stream event: {e}")))),
            }
        });

        Ok(Box::pin(stream))
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_splits_system_from_turns() {
        let provider = AnthropicProvider::new("sk-test", None, Duration::from_secs(5));
        let request = CompletionRequest::new("claude", vec![Message::system("be terse"), Message::user("hi")]);
        let (system, messages) = provider.to_wire(&request);
        assert_eq!(system, Some("be terse".to_string()));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let provider = AnthropicProvider::new("sk-test", Some("https://example.test/v1/".to_string()), Duration::from_secs(5));
        assert_eq!(provider.endpoint(), "https://example.test/v1/messages");
    }
}
