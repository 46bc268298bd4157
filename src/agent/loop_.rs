//! Agent Loop — the reason-act tick every agent runs until it stops,
//! finishes, or fails.
//!
//! # Tick order
//!
//! ```text
//! drain mailbox ──► waiting? (timeout resumes, else sleep-poll)
//!       │
//!       ▼
//! should_stop? ──► terminal outcome
//!       │
//!       ▼
//! iteration += 1 (budget warnings at 85% and max-3)
//!       │
//!       ▼
//! LLM.complete() ──► empty? corrective nudge, next tick
//!       │
//!       ▼
//! parse first <function> block ──► dispatch (cancellable by a Stop message)
//!       │
//!       ▼
//! append observation; finish / wait / continue
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agent::function_call::{looks_like_function_call, parse_function_call};
use crate::agent::state::{AgentState, LifecycleState};
use crate::llm::{ContentBlock, LlmClient, Message};
use crate::tools::dispatcher::{DispatchReport, ToolDispatcher, render_tool_result_block};

const APPROACHING_THRESHOLD: f64 = 0.85;
const FINAL_ITERATIONS_MARGIN: u32 = 3;
const WAITING_TIMEOUT_SECS: i64 = 600;

/// Sleep between ticks while an agent sits in the waiting state.
pub const WAITING_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for one agent's loop. The iteration budget itself lives on
/// [`AgentState`], set when the agent is created.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub identity_block: String,
    pub waiting_timeout_secs: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { system_prompt: String::new(), identity_block: String::new(), waiting_timeout_secs: WAITING_TIMEOUT_SECS }
    }
}

/// A message delivered into an agent's mailbox from elsewhere in the graph
/// — either a rendered envelope / task handed down by another agent
/// or the user, or a cooperative stop signal.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    Task(String),
    Stop,
}

/// Why a loop iteration (`tick`) returned.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Continued,
    EnteredWaiting,
    Finished,
    Stopped,
    MaxIterationsReached,
    LlmFailed,
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continued | Self::EnteredWaiting)
    }
}

pub struct AgentLoop {
    pub state: AgentState,
    config: AgentConfig,
    llm: Arc<LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    mailbox: mpsc::UnboundedReceiver<AgentMessage>,
}

impl AgentLoop {
    pub fn new(state: AgentState, config: AgentConfig, llm: Arc<LlmClient>, dispatcher: Arc<ToolDispatcher>, mailbox: mpsc::UnboundedReceiver<AgentMessage>) -> Self {
        Self { state, config, llm, dispatcher, mailbox }
    }

    /// Drives ticks until the agent reaches a terminal outcome. A waiting
    /// agent stays in this loop, sleep-polling its mailbox, until a message
    /// or the waiting timeout wakes it.
    pub async fn run(&mut self) -> TickOutcome {
        loop {
            let outcome = self.tick().await;
            match outcome {
                TickOutcome::Continued => {}
                TickOutcome::EnteredWaiting => tokio::time::sleep(WAITING_POLL_INTERVAL).await,
                terminal => return terminal,
            }
        }
    }

    /// One pass of the tick cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        // 1. Drain the mailbox without blocking — new tasks resume a waiting
        //    agent, a stop signal is honored at this boundary.
        while let Ok(message) = self.mailbox.try_recv() {
            self.handle_message(message);
        }

        // 2. Waiting check. The idle timeout forces a resume no matter what
        //    flags are set; otherwise the caller sleep-polls.
        if self.state.is_waiting_for_input() {
            if self.state.has_waiting_timeout(self.config.waiting_timeout_secs) {
                tracing::info!(agent_id = %self.state.agent_id, "waiting timeout reached, resuming");
                self.state.resume_from_waiting(Some(Message::user("Waiting timeout reached, resuming. Continue with your task or finish.")));
            } else {
                return TickOutcome::EnteredWaiting;
            }
        }

        // 3. Termination check.
        if self.state.stop_requested {
            self.state.status = LifecycleState::Stopped;
            return TickOutcome::Stopped;
        }
        if self.state.status == LifecycleState::Completed {
            return TickOutcome::Finished;
        }
        if self.state.has_reached_max_iterations() {
            self.state.status = LifecycleState::Failed;
            return TickOutcome::MaxIterationsReached;
        }

        // 4. A prior LLM failure ends the loop in non-interactive mode;
        //    only a user message cleared it before this point.
        if self.state.llm_failed {
            self.state.status = LifecycleState::LlmFailed;
            return TickOutcome::LlmFailed;
        }

        self.state.status = LifecycleState::Running;

        // 5. Iteration tick, with budget warnings injected once each.
        self.state.increment_iteration();
        if self.state.is_approaching_max_iterations(APPROACHING_THRESHOLD) && !self.state.max_iterations_warning_sent {
            self.state.max_iterations_warning_sent = true;
            self.state.add_message(Message::user(format!(
                "You are approaching the iteration limit ({} of {}). Wrap up and call finish soon.",
                self.state.iteration, self.state.max_iterations
            )));
        }
        if self.state.max_iterations > FINAL_ITERATIONS_MARGIN && self.state.iteration == self.state.max_iterations - FINAL_ITERATIONS_MARGIN {
            self.state.add_message(Message::user(
                "CRITICAL: these are your final three iterations. You must finish now with agent_finish or finish_scan.",
            ));
        }

        // 6. Call the model.
        let messages = self.state.get_conversation_history().to_vec();
        let response = match self.llm.complete(&self.state.agent_id, &self.config.system_prompt, &self.config.identity_block, &messages).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(agent_id = %self.state.agent_id, error = %err, "llm request failed");
                self.state.add_error(err.to_string());
                self.state.llm_failed = true;
                self.state.status = LifecycleState::LlmFailed;
                return TickOutcome::LlmFailed;
            }
        };

        let text = response.content.clone();
        self.state.add_message(Message::assistant(text.clone()));

        if text.trim().is_empty() {
            self.state.add_message(Message::user(
                "Your last response was empty. Call a tool, wait_for_message if you are blocked, or finish.",
            ));
            return TickOutcome::Continued;
        }

        // 7. Parse the first function call (only the first block is honored)
        //    and dispatch it.
        if !looks_like_function_call(&text) {
            self.state.add_message(Message::user(
                "No <function> call found. Every turn must either call a tool or call finish_scan/agent_finish.",
            ));
            return TickOutcome::Continued;
        }

        let call = match parse_function_call(&text) {
            Ok(call) => call,
            Err(err) => {
                self.state.add_error(err.to_string());
                self.state.add_message(Message::user(format!("Your function call could not be parsed: {err}. Re-emit it in the correct format.")));
                return TickOutcome::Continued;
            }
        };

        self.state.add_action(call.name.clone(), call.args.clone());

        let Some(report) = self.dispatch_cancellable(call).await else {
            // A Stop message arrived mid-dispatch: the in-flight tool task
            // was dropped, which is a clean pause, not an error.
            self.state.request_stop();
            self.state.status = LifecycleState::Stopped;
            return TickOutcome::Stopped;
        };

        self.state.add_observation(render_observation(&report));

        if report.should_finish {
            let result = report.outcomes.last().map(|o| o.result.output.clone()).unwrap_or_default();
            self.state.set_completed(result);
            return TickOutcome::Finished;
        }
        if report.should_wait {
            self.state.waiting_reason = report.wait_reason.clone();
            self.state.enter_waiting_state(false);
            return TickOutcome::EnteredWaiting;
        }

        TickOutcome::Continued
    }

    /// Runs the dispatcher while still listening on the mailbox: a Stop
    /// message cancels the in-flight tool turn (returns `None`); any other
    /// message is deferred and appended once the turn completes.
    async fn dispatch_cancellable(&mut self, call: crate::agent::function_call::FunctionCall) -> Option<DispatchReport> {
        let snapshot = self.state.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let dispatch = dispatcher.dispatch_turn(&snapshot, vec![call]);
        tokio::pin!(dispatch);

        let mut deferred = Vec::new();
        let mut mailbox_open = true;
        let report = loop {
            if mailbox_open {
                tokio::select! {
                    report = &mut dispatch => break Some(report),
                    message = self.mailbox.recv() => match message {
                        Some(AgentMessage::Stop) => break None,
                        Some(other) => deferred.push(other),
                        None => mailbox_open = false,
                    },
                }
            } else {
                break Some(dispatch.await);
            }
        };

        for message in deferred {
            self.handle_message(message);
        }
        report
    }

    fn handle_message(&mut self, message: AgentMessage) {
        match message {
            AgentMessage::Task(task) => {
                // A user message is the only signal that clears an LLM
                // failure park.
                if self.state.is_waiting_for_input() || self.state.llm_failed {
                    self.state.resume_from_waiting(Some(Message::user(task)));
                } else {
                    self.state.add_message(Message::user(task));
                }
            }
            AgentMessage::Stop => self.state.request_stop(),
        }
    }
}

/// Builds the single observation message for a dispatched turn: one
/// `<tool_result>` block per invocation in original order, with any lifted
/// image attachments appended as image blocks.
fn render_observation(report: &DispatchReport) -> Message {
    let text = report.outcomes.iter().map(render_tool_result_block).collect::<Vec<_>>().join("\n");
    let images: Vec<ContentBlock> = report
        .outcomes
        .iter()
        .flat_map(|o| o.result.images.iter())
        .map(|data| ContentBlock::Image { data: data.clone(), media_type: "image/png".to_string() })
        .collect();

    if images.is_empty() {
        Message::user(text)
    } else {
        let mut blocks = vec![ContentBlock::text(text)];
        blocks.extend(images);
        Message::user_blocks(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxMode;
    use crate::llm::{CompletionResponse, LLMProvider, LlmError, LlmRequestQueue, LlmResult, StreamResponse};
    use crate::sandbox::SandboxToolClient;
    use crate::tools::registry::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        responses: Vec<String>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, _request: crate::llm::CompletionRequest) -> LlmResult<CompletionResponse> {
            let idx = self.next.fetch_add(1, Ordering::SeqCst);
            let content = self.responses.get(idx).cloned().unwrap_or_else(|| self.responses.last().cloned().unwrap_or_default());
            Ok(CompletionResponse { content, thinking_blocks: Vec::new(), model: "test".into(), usage: None, finish_reason: None })
        }
        async fn stream(&self, _request: crate::llm::CompletionRequest) -> LlmResult<StreamResponse> {
            unimplemented!()
        }
        fn context_limit(&self) -> usize {
            100_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LLMProvider for FailingProvider {
        async fn complete(&self, _request: crate::llm::CompletionRequest) -> LlmResult<CompletionResponse> {
            Err(LlmError::ServiceUnavailable("upstream 503".into()))
        }
        async fn stream(&self, _request: crate::llm::CompletionRequest) -> LlmResult<StreamResponse> {
            unimplemented!()
        }
        fn context_limit(&self) -> usize {
            100_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "failing"
        }
    }

    fn make_loop_with(provider: Arc<dyn LLMProvider>) -> (AgentLoop, mpsc::UnboundedSender<AgentMessage>) {
        let queue = Arc::new(LlmRequestQueue::new(4));
        let llm = Arc::new(LlmClient::new(provider, queue, "test-model".to_string()));

        let mut registry = ToolRegistry::new();
        crate::tools::register_builtin_tools(&mut registry);
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(registry),
            Arc::new(SandboxToolClient::new(Duration::from_secs(1), Duration::from_secs(1))),
            SandboxMode::Off,
            4,
        ));

        let state = AgentState::new("a1", "root", None, 10);
        let (tx, rx) = mpsc::unbounded_channel();
        (AgentLoop::new(state, AgentConfig::default(), llm, dispatcher, rx), tx)
    }

    fn make_loop(responses: Vec<&str>) -> (AgentLoop, mpsc::UnboundedSender<AgentMessage>) {
        make_loop_with(Arc::new(ScriptedProvider { responses: responses.into_iter().map(String::from).collect(), next: AtomicUsize::new(0) }))
    }

    #[tokio::test]
    async fn finish_scan_ends_the_loop() {
        let (mut agent_loop, _tx) = make_loop(vec![r#"<function name="finish_scan"><parameter name="summary">done</parameter></function>"#]);
        let outcome = agent_loop.run().await;
        assert_eq!(outcome, TickOutcome::Finished);
        assert_eq!(agent_loop.state.status, LifecycleState::Completed);
    }

    #[tokio::test]
    async fn stop_request_halts_the_loop() {
        let (mut agent_loop, tx) = make_loop(vec!["plain text with no function call"]);
        tx.send(AgentMessage::Stop).unwrap();
        let outcome = agent_loop.run().await;
        assert_eq!(outcome, TickOutcome::Stopped);
        assert_eq!(agent_loop.state.status, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn missing_function_call_nudges_and_continues() {
        let (mut agent_loop, _tx) = make_loop(vec![
            "no tool call here",
            r#"<function name="agent_finish"><parameter name="result">ok</parameter></function>"#,
        ]);
        let outcome = agent_loop.run().await;
        assert_eq!(outcome, TickOutcome::Finished);
        assert!(agent_loop.state.messages.iter().any(|m| m.text().contains("No <function> call found")));
    }

    #[tokio::test]
    async fn llm_failure_terminates_with_llm_failed() {
        let (mut agent_loop, _tx) = make_loop_with(Arc::new(FailingProvider));
        let outcome = agent_loop.run().await;
        assert_eq!(outcome, TickOutcome::LlmFailed);
        assert_eq!(agent_loop.state.status, LifecycleState::LlmFailed);
        assert_eq!(agent_loop.state.errors.len(), 1);
    }

    #[tokio::test]
    async fn wait_tool_parks_agent_and_mailbox_message_resumes_it() {
        let (mut agent_loop, tx) = make_loop(vec![
            r#"<function name="wait_for_message"><parameter name="reason">blocked on recon</parameter></function>"#,
            r#"<function name="agent_finish"><parameter name="result">done</parameter></function>"#,
        ]);

        let outcome = agent_loop.tick().await;
        assert_eq!(outcome, TickOutcome::EnteredWaiting);
        assert_eq!(agent_loop.state.status, LifecycleState::Waiting);
        assert_eq!(agent_loop.state.waiting_reason.as_deref(), Some("blocked on recon"));

        tx.send(AgentMessage::Task("recon finished, proceed".into())).unwrap();
        let outcome = agent_loop.run().await;
        assert_eq!(outcome, TickOutcome::Finished);
        assert!(agent_loop.state.messages.iter().any(|m| m.text().contains("recon finished")));
    }

    #[tokio::test]
    async fn max_iterations_marks_failed() {
        let (mut agent_loop, _tx) = make_loop(vec!["no function call, ever"]);
        let outcome = agent_loop.run().await;
        assert_eq!(outcome, TickOutcome::MaxIterationsReached);
        assert_eq!(agent_loop.state.status, LifecycleState::Failed);
        assert_eq!(agent_loop.state.iteration, agent_loop.state.max_iterations);
    }

    #[tokio::test]
    async fn final_iterations_warning_injected_once() {
        let (mut agent_loop, _tx) = make_loop(vec!["nope"]);
        let _ = agent_loop.run().await;
        let critical = agent_loop.state.messages.iter().filter(|m| m.text().contains("final three iterations")).count();
        assert_eq!(critical, 1);
    }
}
