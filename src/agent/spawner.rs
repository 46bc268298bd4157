//! Bridges the Agent Graph to the Agent Loop: turns a
//! `create_agent`/verifier-spawn request into a running tokio task and
//! reflects its terminal outcome back onto the graph node.

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::loop_::{AgentConfig, AgentLoop, AgentMessage, TickOutcome};
use crate::agent::state::AgentState;
use crate::event_bus::{AppEvent, EventBus};
use crate::graph::{AgentGraph, NodeStatus};
use crate::llm::LlmClient;
use crate::sandbox::SandboxHandle;
use crate::tools::ToolDispatcher;
use crate::verification::VerificationOrchestrator;

/// Everything needed to start one agent's loop task. Built by the tools
/// that create agents (`create_agent`, `create_vulnerability_report`).
pub struct SpawnRequest {
    pub agent_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// First mailbox content: the delegation envelope, optionally preceded
    /// by the parent's inherited context.
    pub seed: String,
    pub max_iterations: u32,
    pub system_prompt: String,
    /// Seeds `AgentState::prompt_context` before the first tick — used e.g.
    /// to stamp a verifier agent with the `report_id` it gates on.
    pub prompt_context: Vec<(String, Value)>,
    /// Workspace handle inherited from the parent; siblings under one scan
    /// share a workspace.
    pub sandbox_handle: Option<SandboxHandle>,
}

/// Abstraction over "start a new agent loop task", so tools that create
/// agents don't need to know how a loop is actually constructed.
pub trait AgentSpawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> mpsc::UnboundedSender<AgentMessage>;
}

/// The concrete spawner used outside of tests: builds a fresh
/// [`AgentState`]/[`AgentLoop`] and drives it to completion on its own
/// tokio task, updating the shared graph node's status when it finishes and
/// routing an undecided verifier's finding to manual review.
///
/// The dispatcher is set after construction via [`set_dispatcher`] rather
/// than taken by `new`: the registry a dispatcher wraps contains tools (e.g.
/// `create_agent`) that themselves hold an `Arc<dyn AgentSpawner>`, so the
/// Scan Controller must have a spawner in hand before it can finish building
/// the dispatcher that spawner needs.
///
/// [`set_dispatcher`]: LoopAgentSpawner::set_dispatcher
pub struct LoopAgentSpawner {
    llm: Arc<LlmClient>,
    dispatcher: OnceLock<Arc<ToolDispatcher>>,
    graph: Arc<AgentGraph>,
    orchestrator: Arc<VerificationOrchestrator>,
    event_bus: Option<Arc<dyn EventBus>>,
    waiting_timeout_secs: i64,
}

impl LoopAgentSpawner {
    pub fn new(llm: Arc<LlmClient>, graph: Arc<AgentGraph>, orchestrator: Arc<VerificationOrchestrator>) -> Self {
        Self { llm, dispatcher: OnceLock::new(), graph, orchestrator, event_bus: None, waiting_timeout_secs: 600 }
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_waiting_timeout_secs(mut self, secs: i64) -> Self {
        self.waiting_timeout_secs = secs;
        self
    }

    /// Supplies the dispatcher every spawned loop will share. Must be called
    /// exactly once, before the first `spawn` call.
    pub fn set_dispatcher(&self, dispatcher: Arc<ToolDispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(event);
        }
    }
}

impl AgentSpawner for LoopAgentSpawner {
    fn spawn(&self, request: SpawnRequest) -> mpsc::UnboundedSender<AgentMessage> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = AgentState::new(request.agent_id.clone(), request.name.clone(), request.parent_id.clone(), request.max_iterations);
        state.sandbox_handle = request.sandbox_handle;
        state.add_message(crate::llm::Message::user(request.seed));
        for (key, value) in request.prompt_context {
            state.update_context(key, value);
        }

        let identity_block = match &request.parent_id {
            Some(parent) => format!("You are agent \"{}\" (agent_id: {}). You were delegated this task by agent {}.", request.name, request.agent_id, parent),
            None => format!("You are agent \"{}\" (agent_id: {}). You are the root agent of this scan.", request.name, request.agent_id),
        };
        let config = AgentConfig {
            system_prompt: request.system_prompt,
            identity_block,
            waiting_timeout_secs: self.waiting_timeout_secs,
        };

        self.publish(AppEvent::AgentCreated { agent_id: request.agent_id.clone(), parent_id: request.parent_id, name: request.name });

        let llm = Arc::clone(&self.llm);
        let dispatcher = Arc::clone(self.dispatcher.get().expect("LoopAgentSpawner::set_dispatcher must be called before spawn"));
        let graph = Arc::clone(&self.graph);
        let orchestrator = Arc::clone(&self.orchestrator);
        let event_bus = self.event_bus.clone();
        let agent_id = request.agent_id;

        tokio::spawn(async move {
            let mut agent_loop = AgentLoop::new(state, config, llm, dispatcher, rx);
            let outcome = agent_loop.run().await;
            let status = match outcome {
                TickOutcome::Finished => NodeStatus::Completed,
                TickOutcome::Stopped => NodeStatus::Stopped,
                TickOutcome::MaxIterationsReached | TickOutcome::LlmFailed => NodeStatus::Failed,
                TickOutcome::EnteredWaiting | TickOutcome::Continued => NodeStatus::Waiting,
            };
            let _ = graph.set_status(&agent_id, status);
            if let Some(bus) = &event_bus {
                let _ = bus.publish(AppEvent::AgentStatusChanged { agent_id: agent_id.clone(), status: format!("{status:?}").to_lowercase() });
            }

            // A verifier that exits without recording a decision strands its
            // finding in the pending queue; route it to manual review with
            // the exit reason.
            if let Some(report_id) = agent_loop.state.prompt_context.get("report_id").and_then(|v| v.as_str()) {
                match outcome {
                    TickOutcome::MaxIterationsReached => {
                        orchestrator.handle_verifier_exit_without_decision(report_id, "max_iterations_without_decision");
                    }
                    TickOutcome::LlmFailed => {
                        orchestrator.handle_verifier_exit_without_decision(report_id, "agent_exception");
                    }
                    _ => {}
                }
            }
        });

        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub struct RecordingSpawner {
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl AgentSpawner for RecordingSpawner {
        fn spawn(&self, request: SpawnRequest) -> mpsc::UnboundedSender<AgentMessage> {
            self.calls.lock().unwrap().push((request.agent_id, request.seed));
            let (tx, _rx) = mpsc::unbounded_channel();
            tx
        }
    }

    #[test]
    fn recording_spawner_captures_calls() {
        let spawner = RecordingSpawner { calls: Mutex::new(Vec::new()) };
        spawner.spawn(SpawnRequest {
            agent_id: "a1".into(),
            name: "scout".into(),
            parent_id: Some("root".into()),
            seed: "task".into(),
            max_iterations: 10,
            system_prompt: "sys".into(),
            prompt_context: Vec::new(),
            sandbox_handle: None,
        });
        assert_eq!(spawner.calls.lock().unwrap().len(), 1);
    }
}
