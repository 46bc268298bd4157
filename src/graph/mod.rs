//! Agent Graph & Mailbox — the process-global record of which agents
//! exist, how they relate, and the envelopes in flight between them.
//!
//! Spawning the actual tokio task that drives an agent's loop is the Scan
//! Controller's job, not this module's: the graph only tracks
//! identity, edges, and mailboxes, and hands the caller what it needs
//! (the seeded inbox content) to start that task.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::agent::AgentMessage;

/// Closed registry of prompt modules a spawned agent may request.
/// Unknown names are rejected at `create_agent` time.
pub const PROMPT_MODULES: &[&str] = &["recon", "web", "api", "network", "exploitation", "reporting", "verification"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Waiting,
    Stopping,
    Completed,
    Stopped,
    Failed,
    Timeout,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Delegation,
    Message,
    SpawnedVerification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Query,
    Instruction,
    Information,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub content: String,
    pub kind: EnvelopeKind,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Set once the envelope has been pushed onto the recipient's queue;
    /// delivery is synchronous, so this is true for every stored envelope.
    pub delivered: bool,
    /// Set when the recipient's loop consumes the envelope at the start of
    /// a tick.
    pub read: bool,
}

/// `Agent` nodes are ordinary scan agents; `Verification` nodes are
/// verifier agents spawned by the verification orchestrator against a
/// specific finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Agent,
    Verification { report_id: String },
}

pub struct AgentNode {
    pub agent_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    sender: UnboundedSender<AgentMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("agent {0} not found")]
    NotFound(String),
    #[error("too many prompt modules requested: {0} (max 5)")]
    TooManyPromptModules(usize),
    #[error("unknown prompt module: {0}")]
    UnknownPromptModule(String),
    #[error("agent {0} already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusTally {
    pub running: usize,
    pub waiting: usize,
    pub stopping: usize,
    pub completed: usize,
    pub stopped: usize,
    pub failed: usize,
    pub timeout: usize,
}

struct Inner {
    nodes: HashMap<String, AgentNode>,
    edges: Vec<Edge>,
    envelopes: Vec<Envelope>,
    root_id: Option<String>,
}

/// Process-global, one-mutex-guards-all-writes graph. Wrap in `Arc` and
/// share across every agent's loop task.
pub struct AgentGraph {
    inner: Mutex<Inner>,
}

impl AgentGraph {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { nodes: HashMap::new(), edges: Vec::new(), envelopes: Vec::new(), root_id: None }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers the root agent. Must be called exactly once, before any
    /// `create_agent` call.
    pub fn register_root(&self, agent_id: impl Into<String>, name: impl Into<String>, sender: UnboundedSender<AgentMessage>) {
        let agent_id = agent_id.into();
        let mut g = self.lock();
        g.nodes.insert(agent_id.clone(), AgentNode { agent_id: agent_id.clone(), parent_id: None, name: name.into(), kind: NodeKind::Agent, status: NodeStatus::Running, sender });
        g.root_id = Some(agent_id);
    }

    /// Allocates a new agent node plus a `delegation` edge from `parent_id`,
    /// and returns the inbox content the caller should seed the new loop
    /// with: an inherited-context block followed by the task
    /// envelope, or just the task if `inherit_context` is false.
    #[allow(clippy::too_many_arguments)]
    pub fn create_agent(
        &self,
        agent_id: impl Into<String>,
        parent_id: &str,
        name: impl Into<String>,
        task: &str,
        inherit_context: bool,
        parent_context: &str,
        prompt_modules: &[String],
        kind: NodeKind,
        sender: UnboundedSender<AgentMessage>,
    ) -> Result<String, GraphError> {
        if prompt_modules.len() > 5 {
            return Err(GraphError::TooManyPromptModules(prompt_modules.len()));
        }
        if let Some(unknown) = prompt_modules.iter().find(|m| !PROMPT_MODULES.contains(&m.as_str())) {
            return Err(GraphError::UnknownPromptModule(unknown.clone()));
        }
        let agent_id = agent_id.into();
        let mut g = self.lock();
        if g.nodes.contains_key(&agent_id) {
            return Err(GraphError::AlreadyExists(agent_id));
        }
        if !g.nodes.contains_key(parent_id) {
            return Err(GraphError::NotFound(parent_id.to_string()));
        }

        // Verifier spawns leave a distinct edge kind so observers can tell
        // delegation fan-out from verification subflows.
        let edge_kind = match &kind {
            NodeKind::Agent => EdgeKind::Delegation,
            NodeKind::Verification { .. } => EdgeKind::SpawnedVerification,
        };
        g.nodes.insert(agent_id.clone(), AgentNode { agent_id: agent_id.clone(), parent_id: Some(parent_id.to_string()), name: name.into(), kind, status: NodeStatus::Running, sender });
        g.edges.push(Edge { from: parent_id.to_string(), to: agent_id.clone(), kind: edge_kind, at: Utc::now() });

        Ok(format_seed(inherit_context, parent_context, task))
    }

    pub fn send_message_to_agent(&self, from: &str, to: &str, content: impl Into<String>, kind: EnvelopeKind, priority: Priority) -> Result<Uuid, GraphError> {
        let mut g = self.lock();
        let content = content.into();

        let sender = {
            let node = g.nodes.get(to).ok_or_else(|| GraphError::NotFound(to.to_string()))?;
            node.sender.clone()
        };
        let envelope = Envelope {
            id: Uuid::new_v4(),
            from: from.to_string(),
            to: to.to_string(),
            content,
            kind,
            priority,
            timestamp: Utc::now(),
            delivered: true,
            read: false,
        };
        g.edges.push(Edge { from: from.to_string(), to: to.to_string(), kind: EdgeKind::Message, at: envelope.timestamp });
        let _ = sender.send(AgentMessage::Task(render_envelope(&envelope)));
        let id = envelope.id;
        g.envelopes.push(envelope);
        Ok(id)
    }

    pub fn send_user_message_to_agent(&self, to: &str, content: impl Into<String>) -> Result<Uuid, GraphError> {
        self.send_message_to_agent("user", to, content, EnvelopeKind::Instruction, Priority::High)
    }

    pub fn mark_envelope_read(&self, id: Uuid) {
        let mut g = self.lock();
        if let Some(envelope) = g.envelopes.iter_mut().find(|e| e.id == id) {
            envelope.read = true;
        }
    }

    pub fn unread_envelope_count(&self, agent_id: &str) -> usize {
        self.lock().envelopes.iter().filter(|e| e.to == agent_id && !e.read).count()
    }

    /// Flags the target stop-requested; the target's loop observes this at
    /// its next mailbox drain and cancels its in-flight tool task
    /// cooperatively. Idempotent on terminal nodes.
    pub fn stop_agent(&self, id: &str) -> Result<(), GraphError> {
        let mut g = self.lock();
        let node = g.nodes.get_mut(id).ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        if node.status.is_terminal() {
            return Ok(());
        }
        node.status = NodeStatus::Stopping;
        let _ = node.sender.send(AgentMessage::Stop);
        Ok(())
    }

    pub fn set_status(&self, id: &str, status: NodeStatus) -> Result<(), GraphError> {
        let mut g = self.lock();
        let node = g.nodes.get_mut(id).ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        node.status = status;
        Ok(())
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.lock().nodes.get(id).map(|n| n.status)
    }

    /// Rooted-tree printout with "← this is you" on `caller`, plus a
    /// status tally.
    pub fn view_agent_graph(&self, caller: &str) -> (String, StatusTally) {
        let g = self.lock();
        let mut tally = StatusTally::default();
        for node in g.nodes.values() {
            match node.status {
                NodeStatus::Running => tally.running += 1,
                NodeStatus::Waiting => tally.waiting += 1,
                NodeStatus::Stopping => tally.stopping += 1,
                NodeStatus::Completed => tally.completed += 1,
                NodeStatus::Stopped => tally.stopped += 1,
                NodeStatus::Failed => tally.failed += 1,
                NodeStatus::Timeout => tally.timeout += 1,
            }
        }

        let mut tree = String::new();
        if let Some(root) = &g.root_id {
            render_subtree(&g.nodes, root, 0, caller, &mut tree);
        }
        (tree, tally)
    }

    /// Requests stop on every non-terminal node.
    /// Joining the underlying tasks within `timeout` is the Scan
    /// Controller's responsibility, since this module doesn't own the
    /// `JoinHandle`s.
    pub fn cleanup_all_agents(&self) {
        let mut g = self.lock();
        for node in g.nodes.values_mut() {
            if !node.status.is_terminal() {
                node.status = NodeStatus::Stopping;
                let _ = node.sender.send(AgentMessage::Stop);
            }
        }
    }

    pub fn edges_snapshot(&self) -> Vec<Edge> {
        self.lock().edges.clone()
    }

    pub fn non_root_running_or_stopping(&self) -> bool {
        let g = self.lock();
        g.nodes.values().any(|n| n.parent_id.is_some() && matches!(n.status, NodeStatus::Running | NodeStatus::Stopping))
    }
}

impl Default for AgentGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// The inbox seed content a newly created agent starts with: an
/// inherited-context block followed by the task envelope, or just the task
/// if context inheritance is disabled. Exposed so callers can compute a
/// child's seed before the sender that will receive it exists yet.
pub fn format_seed(inherit_context: bool, parent_context: &str, task: &str) -> String {
    if inherit_context {
        format!("<inherited_context_from_parent>{parent_context}</inherited_context_from_parent>\n<agent_delegation>{task}</agent_delegation>")
    } else {
        format!("<agent_delegation>{task}</agent_delegation>")
    }
}

fn render_envelope(envelope: &Envelope) -> String {
    format!(
        "<message id=\"{}\" from=\"{}\" kind=\"{:?}\" priority=\"{:?}\">{}</message>",
        envelope.id, envelope.from, envelope.kind, envelope.priority, envelope.content
    )
}

fn render_subtree(nodes: &HashMap<String, AgentNode>, id: &str, depth: usize, caller: &str, out: &mut String) {
    let Some(node) = nodes.get(id) else { return };
    let marker = if id == caller { " ← this is you" } else { "" };
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!("- {} [{:?}]{}\n", node.name, node.status, marker));
    for child in nodes.values().filter(|n| n.parent_id.as_deref() == Some(id)) {
        render_subtree(nodes, &child.agent_id, depth + 1, caller, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn graph_with_root() -> (AgentGraph, mpsc::UnboundedReceiver<AgentMessage>) {
        let graph = AgentGraph::new();
        let (tx, rx) = mpsc::unbounded_channel();
        graph.register_root("root", "root", tx);
        (graph, rx)
    }

    #[test]
    fn create_agent_adds_delegation_edge() {
        let (graph, _rx) = graph_with_root();
        let (tx, _rx2) = mpsc::unbounded_channel();
        let seed = graph.create_agent("child", "root", "child", "do the thing", true, "parent context", &[], NodeKind::Agent, tx).unwrap();
        assert!(seed.contains("inherited_context_from_parent"));
        assert!(seed.contains("do the thing"));
    }

    #[test]
    fn too_many_prompt_modules_rejected() {
        let (graph, _rx) = graph_with_root();
        let (tx, _rx2) = mpsc::unbounded_channel();
        let modules = vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into(), "f".into()];
        let err = graph.create_agent("child", "root", "child", "t", false, "", &modules, NodeKind::Agent, tx);
        assert!(matches!(err, Err(GraphError::TooManyPromptModules(6))));
    }

    #[tokio::test]
    async fn send_message_delivers_to_mailbox() {
        let (graph, _root_rx) = graph_with_root();
        let (tx, mut rx) = mpsc::unbounded_channel();
        graph.create_agent("child", "root", "child", "t", false, "", &[], NodeKind::Agent, tx).unwrap();
        graph.send_message_to_agent("root", "child", "hello", EnvelopeKind::Information, Priority::Normal).unwrap();
        let msg = rx.recv().await.unwrap();
        match msg {
            AgentMessage::Task(text) => assert!(text.contains("hello")),
            _ => panic!("expected a task message"),
        }
    }

    #[test]
    fn verifier_spawn_records_spawned_verification_edge() {
        let (graph, _rx) = graph_with_root();
        let (tx, _rx2) = mpsc::unbounded_channel();
        graph
            .create_agent("verifier-vuln-0001", "root", "verifier-vuln-0001", "verify it", true, "", &["verification".to_string()], NodeKind::Verification { report_id: "vuln-0001".into() }, tx)
            .unwrap();
        let edges = graph.edges_snapshot();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::SpawnedVerification);
    }

    #[test]
    fn unknown_prompt_module_rejected() {
        let (graph, _rx) = graph_with_root();
        let (tx, _rx2) = mpsc::unbounded_channel();
        let err = graph.create_agent("child", "root", "child", "t", false, "", &["astrology".into()], NodeKind::Agent, tx);
        assert!(matches!(err, Err(GraphError::UnknownPromptModule(_))));
    }

    #[test]
    fn envelope_history_tracks_delivery_and_read_state() {
        let (graph, _rx) = graph_with_root();
        let (tx, _rx2) = mpsc::unbounded_channel();
        graph.create_agent("child", "root", "child", "t", false, "", &[], NodeKind::Agent, tx).unwrap();
        let id = graph.send_message_to_agent("root", "child", "hello", EnvelopeKind::Query, Priority::Normal).unwrap();
        assert_eq!(graph.unread_envelope_count("child"), 1);
        graph.mark_envelope_read(id);
        assert_eq!(graph.unread_envelope_count("child"), 0);
    }

    #[test]
    fn stop_agent_is_idempotent_on_terminal() {
        let (graph, _rx) = graph_with_root();
        graph.set_status("root", NodeStatus::Completed).unwrap();
        assert!(graph.stop_agent("root").is_ok());
    }

    #[test]
    fn view_graph_marks_caller_and_tallies_status() {
        let (graph, _rx) = graph_with_root();
        let (tree, tally) = graph.view_agent_graph("root");
        assert!(tree.contains("this is you"));
        assert_eq!(tally.running, 1);
    }
}
