//! Agent State — the per-agent record the loop mutates each tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::llm::Message;
use crate::sandbox::SandboxHandle;

/// Lifecycle states of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Running,
    Waiting,
    Stopping,
    Completed,
    Stopped,
    Failed,
    LlmFailed,
    Timeout,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tool_name: String,
    pub args: Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub agent_id: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub status: LifecycleState,
    pub message_count: usize,
    pub action_count: usize,
    pub error_count: usize,
}

/// Per-agent record. Owned exclusively by that agent's loop task;
/// other agents interact with it only through the graph/mailbox.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    pub iteration: u32,
    pub max_iterations: u32,
    pub max_iterations_warning_sent: bool,

    pub status: LifecycleState,
    pub stop_requested: bool,
    pub llm_failed: bool,
    pub waiting_since: Option<DateTime<Utc>>,
    pub waiting_reason: Option<String>,

    pub messages: Vec<Message>,
    pub actions: Vec<ActionRecord>,
    pub errors: Vec<String>,

    pub sandbox_handle: Option<SandboxHandle>,
    pub prompt_context: HashMap<String, Value>,

    pub result: Option<String>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            parent_id,
            created_at: now,
            last_updated: now,
            iteration: 0,
            max_iterations,
            max_iterations_warning_sent: false,
            status: LifecycleState::Created,
            stop_requested: false,
            llm_failed: false,
            waiting_since: None,
            waiting_reason: None,
            messages: Vec::new(),
            actions: Vec::new(),
            errors: Vec::new(),
            sandbox_handle: None,
            prompt_context: HashMap::new(),
            result: None,
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
        self.touch();
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn add_observation(&mut self, message: Message) {
        self.add_message(message);
    }

    pub fn add_action(&mut self, tool_name: impl Into<String>, args: Value) {
        self.actions.push(ActionRecord { tool_name: tool_name.into(), args, at: Utc::now() });
        self.touch();
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.touch();
    }

    pub fn update_context(&mut self, key: impl Into<String>, value: Value) {
        self.prompt_context.insert(key.into(), value);
        self.touch();
    }

    pub fn set_completed(&mut self, result: impl Into<String>) {
        self.status = LifecycleState::Completed;
        self.result = Some(result.into());
        self.touch();
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
        self.touch();
    }

    /// Termination predicate: stop-requested OR completed OR at max iterations.
    pub fn should_stop(&self) -> bool {
        self.stop_requested || self.status.is_terminal() || self.has_reached_max_iterations()
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.status == LifecycleState::Waiting
    }

    pub fn enter_waiting_state(&mut self, llm_failed: bool) {
        self.status = LifecycleState::Waiting;
        self.waiting_since = Some(Utc::now());
        self.llm_failed = llm_failed;
        self.touch();
    }

    /// Resume from waiting, optionally seeding a new task message.
    pub fn resume_from_waiting(&mut self, new_task: Option<Message>) {
        self.status = LifecycleState::Running;
        self.waiting_since = None;
        self.waiting_reason = None;
        self.llm_failed = false;
        if let Some(task) = new_task {
            self.add_message(task);
        }
        self.touch();
    }

    pub fn has_reached_max_iterations(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Fires once the iteration counter crosses the warning threshold.
    pub fn is_approaching_max_iterations(&self, threshold: f64) -> bool {
        let boundary = (f64::from(self.max_iterations) * threshold).ceil() as u32;
        self.iteration >= boundary && self.iteration < self.max_iterations
    }

    pub fn is_in_final_iterations(&self, margin: u32) -> bool {
        self.max_iterations > margin && self.iteration >= self.max_iterations - margin
    }

    /// Waiting for at least `timeout_secs` forces a resume regardless of any
    /// other flag; the idle timeout overrides everything else while waiting.
    pub fn has_waiting_timeout(&self, timeout_secs: i64) -> bool {
        match self.waiting_since {
            Some(since) => (Utc::now() - since).num_seconds() >= timeout_secs,
            None => false,
        }
    }

    /// True when the last `count` messages are all empty assistant turns —
    /// a signal the model is stuck and needs a corrective nudge.
    pub fn has_empty_last_messages(&self, count: usize) -> bool {
        if self.messages.len() < count {
            return false;
        }
        self.messages[self.messages.len() - count..]
            .iter()
            .all(|m| m.role == crate::llm::MessageRole::Assistant && m.text().trim().is_empty())
    }

    pub fn get_conversation_history(&self) -> &[Message] {
        &self.messages
    }

    pub fn get_execution_summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            agent_id: self.agent_id.clone(),
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            status: self.status,
            message_count: self.messages.len(),
            action_count: self.actions.len(),
            error_count: self.errors.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AgentState {
        AgentState::new("a1", "root", None, 10)
    }

    #[test]
    fn should_stop_at_max_iterations() {
        let mut s = state();
        for _ in 0..10 {
            s.increment_iteration();
        }
        assert!(s.should_stop());
        assert!(s.has_reached_max_iterations());
    }

    #[test]
    fn approaching_threshold_at_85_percent() {
        let mut s = AgentState::new("a1", "root", None, 20);
        for _ in 0..16 {
            s.increment_iteration();
        }
        assert!(s.is_approaching_max_iterations(0.85));
    }

    #[test]
    fn final_iterations_margin() {
        let mut s = AgentState::new("a1", "root", None, 20);
        for _ in 0..18 {
            s.increment_iteration();
        }
        assert!(s.is_in_final_iterations(3));
    }

    #[test]
    fn waiting_timeout_ignores_other_state() {
        let mut s = state();
        s.enter_waiting_state(false);
        s.waiting_since = Some(Utc::now() - chrono::Duration::seconds(601));
        assert!(s.has_waiting_timeout(600));
    }

    #[test]
    fn resume_clears_waiting_and_llm_failed() {
        let mut s = state();
        s.enter_waiting_state(true);
        assert!(s.llm_failed);
        s.resume_from_waiting(Some(Message::user("hi")));
        assert!(!s.llm_failed);
        assert_eq!(s.status, LifecycleState::Running);
        assert_eq!(s.messages.len(), 1);
    }

    #[test]
    fn empty_last_messages_detection() {
        let mut s = state();
        s.add_message(Message::assistant(""));
        s.add_message(Message::assistant(""));
        s.add_message(Message::assistant(""));
        assert!(s.has_empty_last_messages(3));
    }
}
