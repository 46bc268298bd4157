//! Verification Orchestrator — spawns a verifier agent against every
//! newly pending finding, watches it for a timeout, and gates both the
//! verifier's own `agent_finish` and the root agent's `finish_scan`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::findings::{FindingStore, FindingStoreError, normalize_control_test_name};
use crate::graph::{AgentGraph, GraphError, NodeKind, NodeStatus};

pub const VERIFIER_MAX_ITERATIONS: u32 = 50;
pub const WATCHDOG_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase1Reproduction {
    pub reproduction_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase2Validity {
    pub validity_confirmed: bool,
    pub independent_control_tests: Vec<String>,
    pub validity_reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationEvidence {
    pub phase1_reproduction: Phase1Reproduction,
    pub phase2_validity: Phase2Validity,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("phase 1 requires reproduction_count >= 3, got {0}")]
    InsufficientReproduction(u32),
    #[error("phase 2 validity_confirmed must be true")]
    ValidityNotConfirmed,
    #[error("phase 2 independent_control_tests must be non-empty")]
    NoIndependentControlTests,
    #[error("phase 2 validity_reasoning must be non-empty")]
    EmptyValidityReasoning,
    #[error("control tests {0:?} do not cover any of the required tests {1:?} for this vulnerability type")]
    ControlTestsDoNotOverlap(Vec<String>, Vec<String>),
    #[error("verified=false requires a rejection_reason")]
    MissingRejectionReason,
    #[error(transparent)]
    Store(#[from] FindingStoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("finding {0} is already out of the pending queue; call agent_finish instead")]
    AlreadyDecided(String),
}

/// Structural two-phase check, independent of the
/// Finding Store's own bookkeeping.
fn validate_two_phase(evidence: &VerificationEvidence, required_tests: &[String]) -> Result<(), VerificationError> {
    if evidence.phase1_reproduction.reproduction_count < 3 {
        return Err(VerificationError::InsufficientReproduction(evidence.phase1_reproduction.reproduction_count));
    }
    let phase2 = &evidence.phase2_validity;
    if !phase2.validity_confirmed {
        return Err(VerificationError::ValidityNotConfirmed);
    }
    if phase2.independent_control_tests.is_empty() {
        return Err(VerificationError::NoIndependentControlTests);
    }
    if phase2.validity_reasoning.trim().is_empty() {
        return Err(VerificationError::EmptyValidityReasoning);
    }

    if !required_tests.is_empty() {
        let normalized: Vec<String> = phase2.independent_control_tests.iter().map(|t| normalize_control_test_name(t)).collect();
        let overlaps = required_tests.iter().any(|req| normalized.contains(req));
        if !overlaps {
            return Err(VerificationError::ControlTestsDoNotOverlap(normalized, required_tests.to_vec()));
        }
    }
    Ok(())
}

struct WatchdogRegistry {
    cancellers: HashMap<String, oneshot::Sender<()>>,
}

/// Ties the Finding Store and Agent Graph together: everything
/// that happens between `create_vulnerability_report` succeeding and a
/// finding leaving the pending queue.
pub struct VerificationOrchestrator {
    store: Arc<FindingStore>,
    graph: Arc<AgentGraph>,
    watchdogs: Mutex<WatchdogRegistry>,
    watchdog_timeout: Duration,
}

impl VerificationOrchestrator {
    pub fn new(store: Arc<FindingStore>, graph: Arc<AgentGraph>) -> Self {
        Self { store, graph, watchdogs: Mutex::new(WatchdogRegistry { cancellers: HashMap::new() }), watchdog_timeout: Duration::from_secs(WATCHDOG_TIMEOUT_SECS) }
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    /// Registers the watchdog for `report_id`: if no decision arrives within
    /// the configured timeout, the finding moves to manual review and the
    /// verifier node's status becomes `timeout`.
    pub fn start_watchdog(&self, verifier_id: String, report_id: String) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.watchdogs.lock().unwrap_or_else(|e| e.into_inner()).cancellers.insert(report_id.clone(), cancel_tx);

        let store = Arc::clone(&self.store);
        let graph = Arc::clone(&self.graph);
        let timeout = self.watchdog_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if store.is_report_verified(&report_id) {
                        return;
                    }
                    let _ = store.add_to_manual_review(&report_id, "verification_timeout", None);
                    let _ = graph.set_status(&verifier_id, NodeStatus::Timeout);
                }
                _ = cancel_rx => {}
            }
        });
    }

    fn cancel_watchdog(&self, report_id: &str) {
        if let Some(tx) = self.watchdogs.lock().unwrap_or_else(|e| e.into_inner()).cancellers.remove(report_id) {
            let _ = tx.send(());
        }
    }

    /// `verify_vulnerability_report`.
    pub fn record_decision(&self, report_id: &str, verified: bool, verification_evidence: Option<VerificationEvidence>, rejection_reason: Option<String>, notes: Option<String>) -> Result<(), VerificationError> {
        if self.store.is_report_verified(report_id) {
            return Err(VerificationError::AlreadyDecided(report_id.to_string()));
        }
        let finding_type = self.store.pending_vulnerability_type(report_id);
        self.store.increment_verification_attempt(report_id)?;

        let result = if verified {
            let evidence = verification_evidence.ok_or(VerificationError::ValidityNotConfirmed)?;
            let required = finding_type.map(|t| self.store.normalized_required_tests(&t)).unwrap_or_default();
            validate_two_phase(&evidence, &required)?;
            self.store.finalize(report_id, serde_json::to_string(&evidence).unwrap_or_default(), notes).map_err(VerificationError::from)
        } else {
            let reason = rejection_reason.ok_or(VerificationError::MissingRejectionReason)?;
            self.store.reject(report_id, reason, notes).map_err(VerificationError::from)
        };

        self.cancel_watchdog(report_id);
        result
    }

    /// Agent-finish gate: a verifier may not call `agent_finish`
    /// while its finding is still pending.
    pub fn check_verifier_finish(&self, report_id: &str) -> Result<(), String> {
        if self.store.is_report_verified(report_id) {
            Ok(())
        } else {
            Err(format!("finding {report_id} is still pending verification; call verify_vulnerability_report before agent_finish"))
        }
    }

    /// Root-agent finish gate: `finish_scan` fails while any
    /// non-root agent is running/stopping or the pending queue is non-empty.
    pub fn check_finish_scan(&self) -> Result<(), String> {
        let mut blockers = Vec::new();
        let pending = self.store.pending_count();
        if pending > 0 {
            blockers.push(format!("{pending} finding(s) still pending verification"));
        }
        if self.graph.non_root_running_or_stopping() {
            blockers.push("one or more non-root agents are still running".to_string());
        }
        if blockers.is_empty() {
            Ok(())
        } else {
            Err(blockers.join("; "))
        }
    }

    /// Post-run cleanup: a verifier that exits without a decision is
    /// moved to manual review with an explicit reason.
    pub fn handle_verifier_exit_without_decision(&self, report_id: &str, reason: &str) {
        let _ = self.store.add_to_manual_review(report_id, reason, None);
        self.cancel_watchdog(report_id);
    }

    pub fn spawn_node(&self, verifier_id: &str, parent_id: &str, report_id: &str, sender: tokio::sync::mpsc::UnboundedSender<crate::agent::AgentMessage>) -> Result<(), GraphError> {
        self.graph.create_agent(verifier_id, parent_id, format!("verifier-{report_id}"), &format!("Verify finding {report_id}"), true, "", &["verification".to_string()], NodeKind::Verification { report_id: report_id.to_string() }, sender).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{ControlTestConclusion, ControlTestResult, Evidence, HttpExchange, ReproductionStep, Severity};
    use std::time::Duration as StdDuration;

    fn valid_evidence() -> Evidence {
        Evidence {
            http_exchanges: vec![HttpExchange { method: "GET".into(), url: "https://example.test/".into(), request_headers: vec![], request_body: String::new(), response_status: 200, response_headers: vec![], response_body_snippet: String::new(), timestamp: "2026-08-01T00:00:00Z".into() }],
            reproduction_steps: vec![ReproductionStep { step_number: 1, description: "a".into(), expected: "b".into(), actual: "b".into() }],
            poc_payload: "<script>".into(),
            target_url: "https://example.test/".into(),
            negative_control_passed: true,
            negative_control_description: "Baseline request without payload returns no reflection".into(),
            reporter_control_tests: vec![ControlTestResult { name: "reflected_xss_control".into(), description: "x".into(), request: "x".into(), expected_if_vulnerable: "x".into(), expected_if_not_vulnerable: "x".into(), actual: "x".into(), conclusion: ControlTestConclusion::Vulnerable }],
        }
    }

    fn setup() -> (Arc<FindingStore>, Arc<AgentGraph>, VerificationOrchestrator, String) {
        let store = Arc::new(FindingStore::new());
        let graph = Arc::new(AgentGraph::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        graph.register_root("root", "root", tx);
        let id = store.add_pending("t", "c", Severity::High, "reflected_xss", "a sufficiently long claim assertion", valid_evidence()).unwrap();
        let orchestrator = VerificationOrchestrator::new(Arc::clone(&store), Arc::clone(&graph));
        (store, graph, orchestrator, id)
    }

    fn good_evidence() -> VerificationEvidence {
        VerificationEvidence {
            phase1_reproduction: Phase1Reproduction { reproduction_count: 3 },
            phase2_validity: Phase2Validity { validity_confirmed: true, independent_control_tests: vec!["Reflected XSS Control".into()], validity_reasoning: "confirmed via independent re-test".into() },
        }
    }

    #[test]
    fn verifier_finish_blocked_while_pending() {
        let (_store, _graph, orchestrator, id) = setup();
        assert!(orchestrator.check_verifier_finish(&id).is_err());
    }

    #[test]
    fn record_decision_verified_unblocks_finish() {
        let (_store, _graph, orchestrator, id) = setup();
        orchestrator.record_decision(&id, true, Some(good_evidence()), None, None).unwrap();
        assert!(orchestrator.check_verifier_finish(&id).is_ok());
    }

    #[test]
    fn record_decision_rejects_insufficient_reproduction() {
        let (_store, _graph, orchestrator, id) = setup();
        let mut evidence = good_evidence();
        evidence.phase1_reproduction.reproduction_count = 1;
        let err = orchestrator.record_decision(&id, true, Some(evidence), None, None);
        assert!(matches!(err, Err(VerificationError::InsufficientReproduction(1))));
    }

    #[test]
    fn record_decision_rejects_non_overlapping_control_tests() {
        let (_store, _graph, orchestrator, id) = setup();
        let mut evidence = good_evidence();
        evidence.phase2_validity.independent_control_tests = vec!["unrelated control".into()];
        let err = orchestrator.record_decision(&id, true, Some(evidence), None, None);
        assert!(matches!(err, Err(VerificationError::ControlTestsDoNotOverlap(_, _))));
    }

    #[test]
    fn record_decision_false_requires_reason() {
        let (_store, _graph, orchestrator, id) = setup();
        let err = orchestrator.record_decision(&id, false, None, None, None);
        assert!(matches!(err, Err(VerificationError::MissingRejectionReason)));
    }

    #[test]
    fn record_decision_rejection_moves_to_rejected() {
        let (store, _graph, orchestrator, id) = setup();
        orchestrator.record_decision(&id, false, None, Some("false positive".into()), None).unwrap();
        assert_eq!(store.rejected_count(), 1);
    }

    #[test]
    fn root_finish_blocked_while_pending_exists() {
        let (_store, _graph, orchestrator, _id) = setup();
        assert!(orchestrator.check_finish_scan().is_err());
    }

    #[test]
    fn root_finish_allowed_once_queue_empty() {
        let (_store, _graph, orchestrator, id) = setup();
        orchestrator.record_decision(&id, false, None, Some("fp".into()), None).unwrap();
        assert!(orchestrator.check_finish_scan().is_ok());
    }

    #[test]
    fn second_decision_on_same_finding_is_rejected() {
        let (_store, _graph, orchestrator, id) = setup();
        orchestrator.record_decision(&id, false, None, Some("fp".into()), None).unwrap();
        let err = orchestrator.record_decision(&id, true, Some(good_evidence()), None, None);
        assert!(matches!(err, Err(VerificationError::AlreadyDecided(_))));
    }

    #[tokio::test]
    async fn watchdog_moves_to_manual_review_on_timeout() {
        let (store, graph, orchestrator, id) = setup();
        let orchestrator = orchestrator.with_watchdog_timeout(StdDuration::from_millis(20));
        orchestrator.start_watchdog("verifier-1".to_string(), id.clone());
        graph.set_status("root", NodeStatus::Running).unwrap();
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(store.manual_review_count(), 1);
    }

    #[tokio::test]
    async fn watchdog_cancelled_by_decision_does_not_fire() {
        let (store, _graph, orchestrator, id) = setup();
        let orchestrator = orchestrator.with_watchdog_timeout(StdDuration::from_millis(30));
        orchestrator.start_watchdog("verifier-1".to_string(), id.clone());
        orchestrator.record_decision(&id, false, None, Some("fp".into()), None).unwrap();
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(store.manual_review_count(), 0);
        assert_eq!(store.rejected_count(), 1);
    }
}
