use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::agent::state::AgentState;

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output (may be a JSON-encoded structured value).
    pub output: String,
    pub success: bool,
    /// Base64 image attachments lifted out of the output.
    #[serde(default)]
    pub images: Vec<String>,
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { output: output.into(), success: true, images: Vec::new(), metadata: None }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self { output: output.into(), success: false, images: Vec::new(), metadata: None }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Tags a tool by calling signature rather than by trait-object subclass;
/// the dispatcher routes on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSpec {
    /// Takes only its declared arguments; no agent state, runs locally.
    NoArg,
    /// Needs a reference to the calling agent's state (e.g. graph/mailbox
    /// operations, finding submission).
    WithState,
    /// Must be proxied over HTTPS to the sandbox tool-server when not
    /// already executing inside the sandbox.
    SandboxProxied,
}

/// Shared context threaded into every tool invocation.
pub struct ToolContext<'a> {
    pub agent_state: Option<&'a AgentState>,
}

/// A capability that the agent loop can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"create_vulnerability_report"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    fn spec(&self) -> ToolSpec {
        ToolSpec::NoArg
    }

    /// Whether this tool may run concurrently with other invocations in the
    /// same turn. Terminal tools
    /// (`finish_scan`, `agent_finish`) must never report `true` here; the
    /// dispatcher routes them to the finish wave regardless.
    fn parallelizable(&self) -> bool {
        false
    }

    /// Whether this invocation should terminate the agent's turn
    /// (`finish_scan` / `agent_finish`).
    fn is_terminal(&self) -> bool {
        false
    }

    /// Whether a successful invocation parks the calling agent in the
    /// waiting state until a mailbox message or the waiting timeout wakes it
    /// (`wait_for_message`).
    fn is_wait(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolResult, String>;
}

/// Summary of a registered tool, suitable for inclusion in LLM API requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

pub type DynTool = Arc<dyn Tool>;
