//! Agent reasoning layer — the per-agent state and the tick loop that
//! drives it, plus the wire-format parser the loop calls into.
//!
//! # Key types
//! - [`AgentLoop`] — drives the reason/act tick cycle
//! - [`AgentState`] — the agent's mutable record between ticks
//! - [`AgentConfig`] — parameters for the loop (system prompt, iteration budget)
//! - [`FunctionCall`] — a tool invocation extracted from an LLM response

pub mod function_call;
pub mod loop_;
pub mod spawner;
pub mod state;

pub use function_call::{FunctionCall, ParseError, looks_like_function_call, parse_function_call};
pub use loop_::{AgentConfig, AgentLoop, AgentMessage, TickOutcome, WAITING_POLL_INTERVAL};
pub use spawner::{AgentSpawner, LoopAgentSpawner, SpawnRequest};
pub use state::{ActionRecord, AgentState, ExecutionSummary, LifecycleState};
