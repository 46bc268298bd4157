//! Terminal tools every agent registers regardless of role.
//! These never run inside the parallel wave — the dispatcher routes any
//! invocation where `is_terminal()` is true to the finish wave, which runs
//! after everything else, and ends the turn once it executes.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::traits::{Tool, ToolContext, ToolResult};

/// Ends the entire scan. Only meaningful when invoked by the root agent —
/// the verification orchestrator's root-finish gate replaces this variant
/// in a wired-up registry, and the tool itself just records the summary the
/// caller supplied.
pub struct FinishScanTool;

#[async_trait]
impl Tool for FinishScanTool {
    fn name(&self) -> &str {
        "finish_scan"
    }

    fn description(&self) -> &str {
        "Ends the assessment and records the final summary. Only the root agent may call this, and only once all findings are verified or moved to manual review."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "Final summary of the assessment"}
            },
            "required": ["summary"]
        })
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let summary = args.get("summary").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(ToolResult::ok(format!("scan finished: {summary}")))
    }
}

/// Ends a single (non-root) agent's turn, returning its result to its
/// parent via the mailbox.
pub struct AgentFinishTool;

#[async_trait]
impl Tool for AgentFinishTool {
    fn name(&self) -> &str {
        "agent_finish"
    }

    fn description(&self) -> &str {
        "Ends this agent's execution and reports its result back to its parent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {"type": "string", "description": "Result to report back to the parent agent"}
            },
            "required": ["result"]
        })
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let result = args.get("result").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(ToolResult::ok(format!("agent finished: {result}")))
    }
}

/// Parks the calling agent until another agent (or the user) writes to its
/// mailbox, or the waiting timeout fires. The
/// dispatcher reads the success of this call and signals the loop to enter
/// the waiting state after the observation is appended.
pub struct WaitForMessageTool;

#[async_trait]
impl Tool for WaitForMessageTool {
    fn name(&self) -> &str {
        "wait_for_message"
    }

    fn description(&self) -> &str {
        "Pauses this agent until a message arrives in its mailbox or the waiting timeout elapses. Use when blocked on another agent's result."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {"type": "string", "description": "Why this agent is waiting"}
            },
            "required": ["reason"]
        })
    }

    fn is_wait(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or("no reason given");
        Ok(ToolResult::ok(format!("waiting for a message: {reason}")).with_metadata(json!({"reason": reason})))
    }
}
