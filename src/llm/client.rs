//! Prompt assembly, cache-marker placement, history compression, and
//! accounting wrapped around a raw [`LLMProvider`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::provider::{LLMProvider, LlmError, LlmResult};
use super::queue::LlmRequestQueue;
use super::types::{CompletionRequest, CompletionResponse, ContentBlock, Message, TokenUsage};

/// Running per-agent accounting totals.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cache_creation_tokens: u64,
    pub requests: u64,
    pub failed_requests: u64,
    pub cost_usd: f64,
}

impl UsageStats {
    fn record(&mut self, usage: &TokenUsage, cost_usd: f64) {
        self.input_tokens += u64::from(usage.prompt_tokens);
        self.output_tokens += u64::from(usage.completion_tokens);
        self.cached_tokens += u64::from(usage.cached_tokens);
        self.cache_creation_tokens += u64::from(usage.cache_creation_tokens);
        self.requests += 1;
        self.cost_usd += cost_usd;
    }

    fn record_failure(&mut self) {
        self.requests += 1;
        self.failed_requests += 1;
    }
}

/// Computes the cache-marker interval `k`: the smallest multiple of 10 such
/// that `floor((n-1)/k) <= 3`, so at most three history messages carry a
/// marker no matter how long the conversation grows.
fn cache_interval(n: usize) -> usize {
    if n <= 1 {
        return 10;
    }
    let mut k = 10;
    while (n - 1) / k > 3 {
        k += 10;
    }
    k
}

fn mark_cache(msg: &mut Message) {
    if let Some(ContentBlock::Text { cache_control, .. }) = msg.content.last_mut() {
        *cache_control = true;
    }
}

/// Place ephemeral cache-control markers on the system message and up to
/// three history messages at the computed interval.
pub fn apply_cache_markers(system: &mut Message, history: &mut [Message]) {
    mark_cache(system);
    let k = cache_interval(history.len());
    let mut marked = 0;
    let mut i = k;
    while i < history.len() && marked < 3 {
        mark_cache(&mut history[i]);
        marked += 1;
        i += k;
    }
}

/// Pure, idempotent history-compression step.
///
/// Starts from identity and collapses any message whose rendered text
/// exceeds 20000 characters into a head/tail snippet, so oversize tool-result
/// observations don't dominate the context window turn after turn.
pub fn compress_history(history: &[Message]) -> Vec<Message> {
    const THRESHOLD: usize = 20_000;
    const HEAD: usize = 4_000;
    const TAIL: usize = 4_000;

    history
        .iter()
        .map(|m| {
            if m.has_images() {
                return m.clone();
            }
            // Slice by char index, not byte offset: a multi-byte character
            // straddling the head/tail boundary must not split.
            let chars: Vec<char> = m.text().chars().collect();
            if chars.len() <= THRESHOLD {
                return m.clone();
            }
            let head: String = chars[..HEAD].iter().collect();
            let tail: String = chars[chars.len() - TAIL..].iter().collect();
            let summarized = format!("{head}\n\n... [compressed, {} chars omitted] ...\n\n{tail}", chars.len() - HEAD - TAIL);
            Message { role: m.role, content: vec![ContentBlock::text(summarized)], thinking_blocks: m.thinking_blocks.clone() }
        })
        .collect()
}

/// Vision filtering: strip images from history when the provider
/// can't consume them.
pub fn filter_for_vision_support(history: &[Message], supports_vision: bool) -> Vec<Message> {
    if supports_vision {
        history.to_vec()
    } else {
        history.iter().map(Message::strip_images).collect()
    }
}

/// Ties a raw [`LLMProvider`] to the process-wide admission queue and the
/// per-agent accounting totals.
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    queue: Arc<LlmRequestQueue>,
    model: String,
    usage: Mutex<HashMap<String, UsageStats>>,
    last_request: Mutex<Option<TokenUsage>>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>, queue: Arc<LlmRequestQueue>, model: impl Into<String>) -> Self {
        Self { provider, queue, model: model.into(), usage: Mutex::new(HashMap::new()), last_request: Mutex::new(None) }
    }

    /// Assemble the full prompt (system + identity + compressed, cache-marked
    /// history) and issue the request through the admission queue, recording
    /// the tokens against `agent_id`'s running totals.
    #[tracing::instrument(name = "llm.complete", skip_all, fields(model = %self.model, agent_id = %agent_id))]
    pub async fn complete(
        &self,
        agent_id: &str,
        system_prompt: &str,
        identity_block: &str,
        history: &[Message],
    ) -> LlmResult<CompletionResponse> {
        let mut system = Message::system(system_prompt);
        let identity = Message::user(identity_block);

        let compressed = compress_history(history);
        let vision_ready = filter_for_vision_support(&compressed, self.provider.supports_vision());

        let mut messages = vec![identity];
        messages.extend(vision_ready);
        apply_cache_markers(&mut system, &mut messages);
        messages.insert(0, system);

        let request = CompletionRequest::new(self.model.clone(), messages);

        let _permit = self.queue.admit().await;
        let result = self.provider.complete(request).await.map(truncate_at_function_close);

        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let stats = usage.entry(agent_id.to_string()).or_default();
        match &result {
            Ok(response) => {
                if let Some(tok) = &response.usage {
                    stats.record(tok, estimate_cost(tok));
                    *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(*tok);
                } else {
                    stats.requests += 1;
                }
            }
            Err(_) => stats.record_failure(),
        }
        result
    }

    pub fn usage_for(&self, agent_id: &str) -> UsageStats {
        self.usage.lock().unwrap_or_else(|e| e.into_inner()).get(agent_id).cloned().unwrap_or_default()
    }

    /// Totals summed over every agent that has issued a request.
    pub fn usage_total(&self) -> UsageStats {
        let usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let mut total = UsageStats::default();
        for stats in usage.values() {
            total.input_tokens += stats.input_tokens;
            total.output_tokens += stats.output_tokens;
            total.cached_tokens += stats.cached_tokens;
            total.cache_creation_tokens += stats.cache_creation_tokens;
            total.requests += stats.requests;
            total.failed_requests += stats.failed_requests;
            total.cost_usd += stats.cost_usd;
        }
        total
    }

    pub fn last_request_usage(&self) -> Option<TokenUsage> {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Providers that honour stop sequences never emit the close tag; for the
/// rest, everything after the first `</function>` is dropped post hoc.
fn truncate_at_function_close(mut response: CompletionResponse) -> CompletionResponse {
    const CLOSE: &str = "</function>";
    if let Some(pos) = response.content.find(CLOSE) {
        response.content.truncate(pos + CLOSE.len());
    }
    response
}

/// Cost is computed from model metadata when available; in the absence of a
/// pricing table, this returns 0.
fn estimate_cost(_usage: &TokenUsage) -> f64 {
    0.0
}

/// Maps a completion failure into the uniform `{success, message}` shape
/// used at tool-facing boundaries, for contexts that need to surface an LLM
/// failure through a tool response rather than propagate it.
pub fn llm_error_to_message(err: &LlmError) -> String {
    err.to_string()
}
