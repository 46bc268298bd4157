//! Core orchestration library for automated security assessments: a
//! reason-act agent loop, a tool dispatcher that routes local and
//! sandbox-proxied tool calls, an agent graph with mailbox delivery for
//! multi-agent delegation, and a two-phase finding-verification pipeline.
//!
//! The binary entry point (`src/main.rs`) is a thin CLI wrapper around
//! [`scan::run_scan`]; everything else in this crate is usable as a library
//! by an embedding process.

pub mod agent;
pub mod config;
pub mod event_bus;
pub mod findings;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod sandbox;
pub mod scan;
pub mod tools;
pub mod tracer;
pub mod verification;

/// Commonly used types, re-exported for `use scanforge_core::prelude::*;`.
pub mod prelude {
    pub use crate::agent::{AgentConfig, AgentLoop, AgentMessage, AgentSpawner, AgentState, LifecycleState, LoopAgentSpawner, SpawnRequest, TickOutcome};
    pub use crate::config::{AppConfig, load_default_config};
    pub use crate::event_bus::{AppEvent, EventBus, EventFilter, EventType, TokioBroadcastBus};
    pub use crate::findings::{Finding, FindingStatus, FindingStore, Severity};
    pub use crate::graph::{AgentGraph, NodeKind, NodeStatus};
    pub use crate::llm::{AnthropicProvider, LLMProvider, LlmClient, LlmError, LlmRequestQueue};
    pub use crate::scan::{ScanOutcome, ScanPrompts, run_scan};
    pub use crate::tools::{Tool, ToolDispatcher, ToolRegistry, ToolResult};
    pub use crate::tracer::Tracer;
    pub use crate::verification::VerificationOrchestrator;
}
