//! Scan Controller — boots the ambient stack, wires the shared
//! singletons together, starts the root agent, and drives the process to
//! the exit-status contract (0 clean, 2 verified findings, non-zero fatal).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agent::{AgentConfig, AgentLoop, AgentSpawner, AgentState, LoopAgentSpawner, TickOutcome};
use crate::config::AppConfig;
use crate::event_bus::{AppEvent, EventBus, TokioBroadcastBus};
use crate::graph::AgentGraph;
use crate::llm::{AnthropicProvider, LLMProvider, LlmClient, LlmRequestQueue};
use crate::sandbox::SandboxToolClient;
use crate::tools::{ToolDispatcher, ToolRegistry};
use crate::tracer::Tracer;
use crate::verification::VerificationOrchestrator;

const ROOT_AGENT_ID: &str = "root";
const CLEANUP_GRACE: Duration = Duration::from_secs(5);

/// Root-agent system prompt, subagent system prompt, and verifier system
/// prompt. Plain strings for now; rendering these from templates is outside
/// the core's scope.
pub struct ScanPrompts {
    pub root: String,
    pub subagent: String,
    pub verifier: String,
}

impl Default for ScanPrompts {
    fn default() -> Self {
        Self {
            root: "You are the lead agent of a security assessment. Delegate reconnaissance and exploitation to subagents with create_agent, submit findings with create_vulnerability_report, and call finish_scan only once every finding has left the pending queue.".to_string(),
            subagent: "You are a security assessment subagent. Investigate your assigned task, use the available tools, and call agent_finish when done.".to_string(),
            verifier: "You are a verification agent. Independently reproduce the assigned finding at least three times, then run independent control tests before calling verify_vulnerability_report.".to_string(),
        }
    }
}

/// Outcome of a completed scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    FindingsVerified,
}

impl ScanOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            ScanOutcome::Clean => 0,
            ScanOutcome::FindingsVerified => 2,
        }
    }
}

/// Runs one scan end-to-end against `target`, returning the outcome or a
/// fatal error message (mapped to a non-zero exit code by the caller).
pub async fn run_scan(config: &AppConfig, target: &str, prompts: ScanPrompts) -> Result<ScanOutcome, String> {
    let event_bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());
    let tracer = Arc::new(Tracer::new(config.tracer.run_dir.clone(), Some(Arc::clone(&event_bus))));
    let store = tracer.store();
    let graph = Arc::new(AgentGraph::new());
    let orchestrator = Arc::new(
        VerificationOrchestrator::new(Arc::clone(&store), Arc::clone(&graph))
            .with_watchdog_timeout(Duration::from_secs(config.limits.verification_timeout_secs)),
    );

    let api_key = config.llm.api_key.clone().unwrap_or_default();
    let provider: Arc<dyn LLMProvider> = Arc::new(AnthropicProvider::new(
        api_key,
        config.llm.api_base.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    ));
    let queue = Arc::new(LlmRequestQueue::new(config.llm.max_concurrent_requests));
    let llm = Arc::new(LlmClient::new(provider, queue, config.llm.model.clone()));

    let sandbox_client = Arc::new(SandboxToolClient::new(
        Duration::from_secs(config.sandbox.connect_timeout_secs),
        Duration::from_secs(config.sandbox.execution_timeout_secs),
    ));

    // The registry's `create_agent`/`create_vulnerability_report` tools each
    // hold an `Arc<dyn AgentSpawner>`, and the spawner holds the dispatcher
    // that wraps this registry — so the spawner is built first, with its
    // dispatcher filled in once the registry (and therefore the dispatcher)
    // exists.
    let spawner = Arc::new(
        LoopAgentSpawner::new(Arc::clone(&llm), Arc::clone(&graph), Arc::clone(&orchestrator))
            .with_event_bus(Arc::clone(&event_bus))
            .with_waiting_timeout_secs(config.limits.waiting_timeout_secs as i64),
    );
    let spawner_handle: Arc<dyn AgentSpawner> = spawner.clone();

    let mut registry = ToolRegistry::new();
    crate::tools::register_builtin_tools(&mut registry);
    crate::tools::register_orchestration_tools(
        &mut registry,
        Arc::clone(&graph),
        Arc::clone(&spawner_handle),
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        Some(Arc::clone(&tracer)),
        config.limits.max_iterations,
        config.limits.verifier_max_iterations,
        prompts.subagent.clone(),
        prompts.verifier.clone(),
    );
    let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), sandbox_client, config.sandbox.mode, config.limits.parallel_wave_cap));
    spawner.set_dispatcher(Arc::clone(&dispatcher));

    let _ = event_bus.publish(AppEvent::ScanStarted { target: target.to_string() });
    tracing::info!(target = %target, model = %config.llm.model, "scan starting");

    let (tx, rx) = mpsc::unbounded_channel();
    graph.register_root(ROOT_AGENT_ID, "root", tx);

    let mut root_state = AgentState::new(ROOT_AGENT_ID, "root", None, config.limits.max_iterations);
    root_state.add_message(crate::llm::Message::user(format!("<agent_delegation>Assess the target: {target}</agent_delegation>")));

    let root_config = AgentConfig {
        system_prompt: prompts.root,
        identity_block: format!("You are agent \"root\" (agent_id: {ROOT_AGENT_ID}). You are the root agent of this scan against {target}."),
        waiting_timeout_secs: config.limits.waiting_timeout_secs as i64,
    };

    let mut root_loop = AgentLoop::new(root_state, root_config, llm, dispatcher, rx);
    let outcome = root_loop.run().await;

    graph.cleanup_all_agents();
    wait_for_cleanup(&graph, CLEANUP_GRACE).await;

    let scan_result = match outcome {
        TickOutcome::Finished => {
            if store.verified_count() > 0 {
                Ok(ScanOutcome::FindingsVerified)
            } else {
                Ok(ScanOutcome::Clean)
            }
        }
        TickOutcome::Stopped => Err("root agent was stopped before finishing".to_string()),
        TickOutcome::MaxIterationsReached => Err("root agent exhausted its iteration budget".to_string()),
        TickOutcome::LlmFailed => Err("root agent's LLM requests failed and could not be recovered".to_string()),
        TickOutcome::EnteredWaiting | TickOutcome::Continued => {
            Err("root agent loop exited unexpectedly while still active".to_string())
        }
    };

    if let Err(err) = tracer.flush() {
        tracing::warn!(error = %err, "failed to flush run artifacts");
    }
    let exit_code = match &scan_result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => 1,
    };
    let _ = event_bus.publish(AppEvent::ScanCompleted { exit_code });
    tracing::info!(exit_code, "scan finished");

    scan_result
}

/// Polls the graph until every non-root agent has reached a terminal status
/// or `timeout` elapses, whichever comes first. Stragglers past the
/// deadline are abandoned, daemon-style.
async fn wait_for_cleanup(graph: &AgentGraph, timeout: Duration) {
    const POLL: Duration = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + timeout;
    while graph.non_root_running_or_stopping() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL).await;
    }
}
