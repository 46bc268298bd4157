use serde::{Deserialize, Serialize};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single chunk of message content: text or an inlined image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        /// Ephemeral prompt-cache marker: when true, the
        /// provider is asked to cache the prefix ending at this block.
        #[serde(default)]
        cache_control: bool,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        media_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into(), cache_control: false }
    }

    pub fn with_cache_control(mut self) -> Self {
        if let Self::Text { cache_control, .. } = &mut self {
            *cache_control = true;
        }
        self
    }
}

/// A message in a conversation. Content is a list of heterogeneous blocks
/// (text + images) so tool observations can carry screenshots and vision
/// filtering can strip them per provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    /// Extended-thinking blocks returned by the model alongside `content`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thinking_blocks: Vec<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: vec![ContentBlock::text(content)], thinking_blocks: vec![] }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: vec![ContentBlock::text(content)], thinking_blocks: vec![] }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: vec![ContentBlock::text(content)], thinking_blocks: vec![] }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self { role: MessageRole::User, content: blocks, thinking_blocks: vec![] }
    }

    /// Concatenate all text blocks, dropping image blocks. Used wherever a
    /// plain-string view of the message is needed (logging, truncation).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_images(&self) -> bool {
        self.content.iter().any(|b| matches!(b, ContentBlock::Image { .. }))
    }

    /// Replace every image block with a fixed placeholder, for models that
    /// don't support vision input.
    pub fn strip_images(&self) -> Self {
        let content = self
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::Image { .. } => {
                    ContentBlock::text("[image omitted: model does not support vision]")
                }
                other => other.clone(),
            })
            .collect();
        Self { role: self.role, content, thinking_blocks: self.thinking_blocks.clone() }
    }
}

/// Request for an LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Reasoning-effort hint for models that expose one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Stop sequences; the function-call close tag is always included so a
    /// response never runs past its first tool invocation.
    #[serde(default)]
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stream: None,
            reasoning_effort: None,
            stop: vec!["</function>".to_string()],
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    #[serde(default)]
    pub thinking_blocks: Vec<String>,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Token usage and cost-relevant accounting for a single request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A chunk of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub is_final: bool,
    pub finish_reason: Option<String>,
}
