//! Tools that drive the Finding Store and the Verification
//! Orchestrator: `create_vulnerability_report` (which triggers spawning
//! a verifier) and `verify_vulnerability_report` (the verifier's
//! decision call), plus the gate-aware finish variants.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::{AgentSpawner, SpawnRequest};
use crate::findings::{Evidence, FindingStore, Severity};
use crate::verification::{VerificationEvidence, VerificationOrchestrator};

use super::traits::{Tool, ToolContext, ToolResult, ToolSpec};

fn arg_str(args: &Value, key: &str) -> Result<String, String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string).ok_or_else(|| format!("missing required argument: {key}"))
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    match s {
        "critical" => Ok(Severity::Critical),
        "high" => Ok(Severity::High),
        "medium" => Ok(Severity::Medium),
        "low" => Ok(Severity::Low),
        "info" => Ok(Severity::Info),
        other => Err(format!("invalid severity: {other}")),
    }
}

pub struct CreateVulnerabilityReportTool {
    store: Arc<FindingStore>,
    orchestrator: Arc<VerificationOrchestrator>,
    spawner: Arc<dyn AgentSpawner>,
    verification_prompt: String,
    verifier_max_iterations: u32,
}

impl CreateVulnerabilityReportTool {
    pub fn new(store: Arc<FindingStore>, orchestrator: Arc<VerificationOrchestrator>, spawner: Arc<dyn AgentSpawner>, verification_prompt: impl Into<String>) -> Self {
        Self {
            store,
            orchestrator,
            spawner,
            verification_prompt: verification_prompt.into(),
            verifier_max_iterations: crate::verification::VERIFIER_MAX_ITERATIONS,
        }
    }

    pub fn with_verifier_max_iterations(mut self, max_iterations: u32) -> Self {
        self.verifier_max_iterations = max_iterations;
        self
    }
}

#[async_trait]
impl Tool for CreateVulnerabilityReportTool {
    fn name(&self) -> &str {
        "create_vulnerability_report"
    }

    fn description(&self) -> &str {
        "Submits a candidate vulnerability finding for independent verification. A verifier agent is spawned automatically; the finding stays pending until it records a decision."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string"},
                "severity": {"type": "string", "enum": ["critical", "high", "medium", "low", "info"]},
                "vulnerability_type": {"type": "string"},
                "claim_assertion": {"type": "string", "minLength": 20},
                "evidence": {"type": "object"}
            },
            "required": ["title", "content", "severity", "vulnerability_type", "claim_assertion", "evidence"]
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::WithState
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let Some(state) = ctx.agent_state else {
            return Ok(ToolResult::err("create_vulnerability_report requires agent state"));
        };
        let title = arg_str(&args, "title")?;
        let content = arg_str(&args, "content")?;
        let severity = parse_severity(&arg_str(&args, "severity")?)?;
        let vulnerability_type = arg_str(&args, "vulnerability_type")?;
        let claim_assertion = arg_str(&args, "claim_assertion")?;
        let evidence: Evidence = match args.get("evidence").cloned().map(serde_json::from_value) {
            Some(Ok(evidence)) => evidence,
            Some(Err(err)) => return Ok(ToolResult::err(format!("evidence did not match the expected shape: {err}"))),
            None => return Ok(ToolResult::err("missing required argument: evidence")),
        };

        let report_id = match self.store.add_pending(title.clone(), content, severity, vulnerability_type, claim_assertion, evidence) {
            Ok(id) => id,
            Err(err) => return Ok(ToolResult::err(err.to_string())),
        };

        let verifier_id = format!("verifier-{report_id}");
        let seed = format!("Independently verify the finding {report_id} (\"{title}\"). Reproduce it at least 3 times and run independent control tests before recording a decision.");
        let sender = self.spawner.spawn(SpawnRequest {
            agent_id: verifier_id.clone(),
            name: verifier_id.clone(),
            parent_id: Some(state.agent_id.clone()),
            seed,
            max_iterations: self.verifier_max_iterations,
            system_prompt: self.verification_prompt.clone(),
            prompt_context: vec![("report_id".to_string(), json!(report_id))],
            sandbox_handle: state.sandbox_handle.clone(),
        });

        if let Err(err) = self.orchestrator.spawn_node(&verifier_id, &state.agent_id, &report_id, sender) {
            return Ok(ToolResult::err(format!("finding {report_id} recorded but verifier could not be registered: {err}")));
        }
        self.orchestrator.start_watchdog(verifier_id, report_id.clone());

        Ok(ToolResult::ok(format!("{report_id} submitted for verification")).with_metadata(json!({"report_id": report_id})))
    }
}

pub struct VerifyVulnerabilityReportTool {
    orchestrator: Arc<VerificationOrchestrator>,
}

impl VerifyVulnerabilityReportTool {
    pub fn new(orchestrator: Arc<VerificationOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for VerifyVulnerabilityReportTool {
    fn name(&self) -> &str {
        "verify_vulnerability_report"
    }

    fn description(&self) -> &str {
        "Records a verifier's decision on a pending finding: verified (with two-phase evidence) or rejected (with a reason)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_id": {"type": "string"},
                "verified": {"type": "boolean"},
                "verification_evidence": {"type": "object"},
                "rejection_reason": {"type": "string"},
                "notes": {"type": "string"}
            },
            "required": ["report_id", "verified"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let report_id = arg_str(&args, "report_id")?;
        let verified = args.get("verified").and_then(|v| v.as_bool()).ok_or("missing required argument: verified")?;
        let notes = args.get("notes").and_then(|v| v.as_str()).map(str::to_string);
        let rejection_reason = args.get("rejection_reason").and_then(|v| v.as_str()).map(str::to_string);
        let verification_evidence: Option<VerificationEvidence> = match args.get("verification_evidence").cloned() {
            Some(value) => match serde_json::from_value(value) {
                Ok(evidence) => Some(evidence),
                Err(err) => return Ok(ToolResult::err(format!("verification_evidence did not match the expected shape: {err}"))),
            },
            None => None,
        };

        match self.orchestrator.record_decision(&report_id, verified, verification_evidence, rejection_reason, notes) {
            Ok(()) => Ok(ToolResult::ok(format!("decision recorded for {report_id}"))),
            Err(err) => Ok(ToolResult::err(err.to_string())),
        }
    }
}

/// Replaces the generic `agent_finish` for verifier agents: denies the call
/// while the finding it was spawned to check is still pending. The agent's
/// `prompt_context["report_id"]` identifies which finding gates it; agents
/// without that key behave like the plain `agent_finish`.
pub struct VerifierAwareFinishTool {
    orchestrator: Arc<VerificationOrchestrator>,
}

impl VerifierAwareFinishTool {
    pub fn new(orchestrator: Arc<VerificationOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for VerifierAwareFinishTool {
    fn name(&self) -> &str {
        "agent_finish"
    }

    fn description(&self) -> &str {
        "Ends this agent's execution and reports its result back to its parent. Verifier agents are blocked until their finding has left the pending queue."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"result": {"type": "string"}},
            "required": ["result"]
        })
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::WithState
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        let result = args.get("result").and_then(|v| v.as_str()).unwrap_or_default();
        if let Some(state) = ctx.agent_state {
            if let Some(report_id) = state.prompt_context.get("report_id").and_then(|v| v.as_str()) {
                if let Err(message) = self.orchestrator.check_verifier_finish(report_id) {
                    return Ok(ToolResult::err(message));
                }
            }
        }
        Ok(ToolResult::ok(format!("agent finished: {result}")))
    }
}

/// Replaces the generic `finish_scan` once the Scan Controller has an
/// orchestrator to ask: denies the call while any finding is still pending
/// verification or any non-root agent is still running. On success the
/// supplied summary becomes the tracer's final report content.
pub struct ScanAwareFinishTool {
    orchestrator: Arc<VerificationOrchestrator>,
    tracer: Option<Arc<crate::tracer::Tracer>>,
}

impl ScanAwareFinishTool {
    pub fn new(orchestrator: Arc<VerificationOrchestrator>) -> Self {
        Self { orchestrator, tracer: None }
    }

    pub fn with_tracer(mut self, tracer: Arc<crate::tracer::Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }
}

#[async_trait]
impl Tool for ScanAwareFinishTool {
    fn name(&self) -> &str {
        "finish_scan"
    }

    fn description(&self) -> &str {
        "Ends the assessment and records the final summary. Only the root agent may call this, and only once all findings are verified or moved to manual review."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}},
            "required": ["summary"]
        })
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
        if let Err(message) = self.orchestrator.check_finish_scan() {
            return Ok(ToolResult::err(message));
        }
        let summary = args.get("summary").and_then(|v| v.as_str()).unwrap_or_default();
        if let Some(tracer) = &self.tracer {
            tracer.set_final_report(summary);
        }
        Ok(ToolResult::ok(format!("scan finished: {summary}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{ControlTestConclusion, ControlTestResult, HttpExchange, ReproductionStep};
    use crate::graph::AgentGraph as Graph;
    use tokio::sync::mpsc;

    struct NullSpawner;
    impl AgentSpawner for NullSpawner {
        fn spawn(&self, _request: SpawnRequest) -> mpsc::UnboundedSender<crate::agent::AgentMessage> {
            let (tx, _rx) = mpsc::unbounded_channel();
            tx
        }
    }

    fn valid_evidence_json() -> Value {
        let evidence = Evidence {
            http_exchanges: vec![HttpExchange { method: "GET".into(), url: "https://example.test/".into(), request_headers: vec![], request_body: String::new(), response_status: 200, response_headers: vec![], response_body_snippet: String::new(), timestamp: "2026-08-01T00:00:00Z".into() }],
            reproduction_steps: vec![ReproductionStep { step_number: 1, description: "a".into(), expected: "b".into(), actual: "b".into() }],
            poc_payload: "<script>".into(),
            target_url: "https://example.test/".into(),
            negative_control_passed: true,
            negative_control_description: "Baseline request without payload returns no reflection".into(),
            reporter_control_tests: vec![ControlTestResult { name: "reflected_xss_control".into(), description: "x".into(), request: "x".into(), expected_if_vulnerable: "x".into(), expected_if_not_vulnerable: "x".into(), actual: "x".into(), conclusion: ControlTestConclusion::Vulnerable }],
        };
        serde_json::to_value(evidence).unwrap()
    }

    #[tokio::test]
    async fn create_report_spawns_verifier_and_stays_pending() {
        let store = Arc::new(FindingStore::new());
        let graph = Arc::new(Graph::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        graph.register_root("root", "root", tx);
        let orchestrator = Arc::new(VerificationOrchestrator::new(Arc::clone(&store), Arc::clone(&graph)));
        let tool = CreateVulnerabilityReportTool::new(Arc::clone(&store), Arc::clone(&orchestrator), Arc::new(NullSpawner), "verify");

        let state = crate::agent::AgentState::new("root", "root", None, 10);
        let ctx = ToolContext { agent_state: Some(&state) };
        let result = tool
            .execute(
                json!({
                    "title": "XSS in q",
                    "content": "details",
                    "severity": "high",
                    "vulnerability_type": "reflected_xss",
                    "claim_assertion": "a sufficiently long claim assertion",
                    "evidence": valid_evidence_json(),
                }),
                &ctx,
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn verifier_finish_blocked_until_decided() {
        let store = Arc::new(FindingStore::new());
        let graph = Arc::new(Graph::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        graph.register_root("root", "root", tx);
        let id = store.add_pending("t", "c", Severity::High, "reflected_xss", "a sufficiently long claim assertion", serde_json::from_value(valid_evidence_json()).unwrap()).unwrap();
        let orchestrator = Arc::new(VerificationOrchestrator::new(Arc::clone(&store), graph));
        let finish_tool = VerifierAwareFinishTool::new(orchestrator);

        let mut state = crate::agent::AgentState::new("verifier-1", "verifier-1", Some("root".into()), 50);
        state.update_context("report_id", json!(id));
        let ctx = ToolContext { agent_state: Some(&state) };
        let result = finish_tool.execute(json!({"result": "done"}), &ctx).await.unwrap();
        assert!(!result.success);
    }
}
