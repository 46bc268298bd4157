//! Tools that mutate the Agent Graph & Mailbox — `create_agent`,
//! `send_message_to_agent`, `stop_agent`, `view_agent_graph`.
//! User-originated messages go through `AgentGraph::send_user_message_to_agent`
//! directly; no tool wraps them since the sender is not an agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::agent::{AgentSpawner, SpawnRequest};
use crate::graph::{AgentGraph, EnvelopeKind, NodeKind, Priority};

use super::traits::{Tool, ToolContext, ToolResult, ToolSpec};

fn arg_str(args: &Value, key: &str) -> Result<String, String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string).ok_or_else(|| format!("missing required argument: {key}"))
}

pub struct CreateAgentTool {
    graph: Arc<AgentGraph>,
    spawner: Arc<dyn AgentSpawner>,
    default_max_iterations: u32,
    system_prompt_template: String,
}

impl CreateAgentTool {
    pub fn new(graph: Arc<AgentGraph>, spawner: Arc<dyn AgentSpawner>, default_max_iterations: u32, system_prompt_template: impl Into<String>) -> Self {
        Self { graph, spawner, default_max_iterations, system_prompt_template: system_prompt_template.into() }
    }
}

#[async_trait]
impl Tool for CreateAgentTool {
    fn name(&self) -> &str {
        "create_agent"
    }

    fn description(&self) -> &str {
        "Spawns a new subagent with a delegated task. Optionally inherits the calling agent's conversation as context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "task": {"type": "string"},
                "inherit_context": {"type": "boolean", "default": true},
                "prompt_modules": {"type": "array", "items": {"type": "string"}, "maxItems": 5}
            },
            "required": ["name", "task"]
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::WithState
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let Some(state) = ctx.agent_state else {
            return Ok(ToolResult::err("create_agent requires agent state"));
        };
        let name = arg_str(&args, "name")?;
        let task = arg_str(&args, "task")?;
        let inherit_context = args.get("inherit_context").and_then(|v| v.as_bool()).unwrap_or(true);
        let prompt_modules: Vec<String> = args
            .get("prompt_modules")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let parent_context = state.get_conversation_history().iter().map(|m| m.text()).collect::<Vec<_>>().join("\n");
        let mut child_id = format!("agent-{}", Uuid::new_v4());
        child_id.truncate("agent-".len() + 8);
        let seed = crate::graph::format_seed(inherit_context, &parent_context, &task);

        let sender = self.spawner.spawn(SpawnRequest {
            agent_id: child_id.clone(),
            name: name.clone(),
            parent_id: Some(state.agent_id.clone()),
            seed,
            max_iterations: self.default_max_iterations,
            system_prompt: self.system_prompt_template.clone(),
            prompt_context: Vec::new(),
            sandbox_handle: state.sandbox_handle.clone(),
        });
        if let Err(err) = self.graph.create_agent(child_id.clone(), &state.agent_id, name, &task, inherit_context, &parent_context, &prompt_modules, NodeKind::Agent, sender) {
            return Ok(ToolResult::err(err.to_string()));
        }

        Ok(ToolResult::ok(format!("spawned agent {child_id}")).with_metadata(json!({"agent_id": child_id})))
    }
}

pub struct SendMessageToAgentTool {
    graph: Arc<AgentGraph>,
}

impl SendMessageToAgentTool {
    pub fn new(graph: Arc<AgentGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for SendMessageToAgentTool {
    fn name(&self) -> &str {
        "send_message_to_agent"
    }

    fn description(&self) -> &str {
        "Sends a message to another agent's mailbox."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {"type": "string"},
                "content": {"type": "string"},
                "kind": {"type": "string", "enum": ["query", "instruction", "information"], "default": "information"},
                "priority": {"type": "string", "enum": ["low", "normal", "high", "urgent"], "default": "normal"}
            },
            "required": ["target", "content"]
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::WithState
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let Some(state) = ctx.agent_state else {
            return Ok(ToolResult::err("send_message_to_agent requires agent state"));
        };
        let target = arg_str(&args, "target")?;
        let content = arg_str(&args, "content")?;
        let kind = match args.get("kind").and_then(|v| v.as_str()).unwrap_or("information") {
            "query" => EnvelopeKind::Query,
            "instruction" => EnvelopeKind::Instruction,
            _ => EnvelopeKind::Information,
        };
        let priority = match args.get("priority").and_then(|v| v.as_str()).unwrap_or("normal") {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        };

        match self.graph.send_message_to_agent(&state.agent_id, &target, content, kind, priority) {
            Ok(envelope_id) => Ok(ToolResult::ok(format!("message delivered to {target}")).with_metadata(json!({"envelope_id": envelope_id}))),
            Err(err) => Ok(ToolResult::err(err.to_string())),
        }
    }
}

pub struct StopAgentTool {
    graph: Arc<AgentGraph>,
}

impl StopAgentTool {
    pub fn new(graph: Arc<AgentGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for StopAgentTool {
    fn name(&self) -> &str {
        "stop_agent"
    }

    fn description(&self) -> &str {
        "Requests that another agent stop at its next tick boundary."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"target": {"type": "string"}}, "required": ["target"]})
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let target = arg_str(&args, "target")?;
        match self.graph.stop_agent(&target) {
            Ok(()) => Ok(ToolResult::ok(format!("stop requested for {target}"))),
            Err(err) => Ok(ToolResult::err(err.to_string())),
        }
    }
}

pub struct ViewAgentGraphTool {
    graph: Arc<AgentGraph>,
}

impl ViewAgentGraphTool {
    pub fn new(graph: Arc<AgentGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for ViewAgentGraphTool {
    fn name(&self) -> &str {
        "view_agent_graph"
    }

    fn description(&self) -> &str {
        "Returns a tree view of every agent in this scan and a status tally."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::WithState
    }

    fn parallelizable(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let caller = ctx.agent_state.map(|s| s.agent_id.as_str()).unwrap_or("");
        let (tree, tally) = self.graph.view_agent_graph(caller);
        Ok(ToolResult::ok(tree).with_metadata(serde_json::to_value(tally).unwrap_or_default()))
    }
}
