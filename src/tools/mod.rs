pub mod builtin;
pub mod dispatcher;
pub mod finding_tools;
pub mod graph_tools;
pub mod registry;
pub mod traits;

pub use dispatcher::{DispatchOutcome, DispatchReport, ToolDispatcher, WavePlan, classify_waves, render_tool_result_block};
pub use registry::ToolRegistry;
pub use traits::{DynTool, Tool, ToolContext, ToolInfo, ToolResult, ToolSpec};

/// Registers the tools every agent gets regardless of role: the terminal
/// tools that end a turn and the mailbox wait primitive.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    use std::sync::Arc;
    registry.register(Arc::new(builtin::FinishScanTool));
    registry.register(Arc::new(builtin::AgentFinishTool));
    registry.register(Arc::new(builtin::WaitForMessageTool));
}

/// Wires the Agent Graph and Finding Store / Verification Orchestrator
/// tools into a registry. Called once by the Scan Controller
/// after it has constructed the shared `Arc` handles these tools close over;
/// `agent_finish` is re-registered here to the verifier-aware variant so it
/// overrides the plain one from [`register_builtin_tools`] for every agent
/// (root agents have no `report_id` in their prompt context, so the gate is
/// a no-op for them).
#[allow(clippy::too_many_arguments)]
pub fn register_orchestration_tools(
    registry: &mut ToolRegistry,
    graph: std::sync::Arc<crate::graph::AgentGraph>,
    spawner: std::sync::Arc<dyn crate::agent::AgentSpawner>,
    store: std::sync::Arc<crate::findings::FindingStore>,
    orchestrator: std::sync::Arc<crate::verification::VerificationOrchestrator>,
    tracer: Option<std::sync::Arc<crate::tracer::Tracer>>,
    default_max_iterations: u32,
    verifier_max_iterations: u32,
    subagent_system_prompt: impl Into<String>,
    verifier_system_prompt: impl Into<String>,
) {
    use std::sync::Arc;

    registry.register(Arc::new(graph_tools::CreateAgentTool::new(Arc::clone(&graph), Arc::clone(&spawner), default_max_iterations, subagent_system_prompt)));
    registry.register(Arc::new(graph_tools::SendMessageToAgentTool::new(Arc::clone(&graph))));
    registry.register(Arc::new(graph_tools::StopAgentTool::new(Arc::clone(&graph))));
    registry.register(Arc::new(graph_tools::ViewAgentGraphTool::new(Arc::clone(&graph))));

    registry.register(Arc::new(
        finding_tools::CreateVulnerabilityReportTool::new(Arc::clone(&store), Arc::clone(&orchestrator), spawner, verifier_system_prompt)
            .with_verifier_max_iterations(verifier_max_iterations),
    ));
    registry.register(Arc::new(finding_tools::VerifyVulnerabilityReportTool::new(Arc::clone(&orchestrator))));
    registry.register(Arc::new(finding_tools::VerifierAwareFinishTool::new(Arc::clone(&orchestrator))));

    let mut finish = finding_tools::ScanAwareFinishTool::new(orchestrator);
    if let Some(tracer) = tracer {
        finish = finish.with_tracer(tracer);
    }
    registry.register(Arc::new(finish));
}
