//! Finding Store — the four disjoint status queues a vulnerability
//! report moves through one-way.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evidence::{Evidence, EvidenceError, normalize_control_test_name};
use super::registry;
use crate::event_bus::{AppEvent, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    PendingVerification,
    Verified,
    Rejected,
    NeedsManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub content: String,
    pub severity: Severity,
    pub vulnerability_type: String,
    pub claim_assertion: String,
    pub evidence: Evidence,
    pub status: FindingStatus,
    pub verification_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verification_evidence: Option<String>,
    pub rejection_reason: Option<String>,
    pub review_reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FindingStoreError {
    #[error("evidence validation failed: {0}")]
    InvalidEvidence(String),
    #[error("claim_assertion must be at least 20 characters")]
    ClaimAssertionTooShort,
    #[error("unknown vulnerability_type: {0}")]
    UnknownVulnerabilityType(String),
    #[error("evidence is missing required control tests for this vulnerability type: {0:?}")]
    MissingRequiredControlTests(Vec<String>),
    #[error("finding {0} not found")]
    NotFound(String),
    #[error("finding {0} is not pending (current status: {1:?})")]
    NotPending(String, FindingStatus),
}

impl From<EvidenceError> for FindingStoreError {
    fn from(err: EvidenceError) -> Self {
        Self::InvalidEvidence(err.to_string())
    }
}

struct Queues {
    pending: Vec<Finding>,
    verified: Vec<Finding>,
    rejected: Vec<Finding>,
    manual_review: Vec<Finding>,
    next_id: u32,
}

/// Owns all four queues behind one mutex; every
/// mutation serializes here so finding IDs are assigned in strictly
/// increasing order and no finding is ever observed in two queues at once.
pub struct FindingStore {
    inner: Mutex<Queues>,
    event_bus: Option<Arc<dyn EventBus>>,
}

/// Read-only copy of the four queues, taken under the store's mutex; what
/// the tracer persists and display surfaces render from.
#[derive(Debug, Clone, Serialize)]
pub struct FindingQueuesSnapshot {
    pub pending: Vec<Finding>,
    pub verified: Vec<Finding>,
    pub rejected: Vec<Finding>,
    pub manual_review: Vec<Finding>,
}

impl FindingStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Queues { pending: Vec::new(), verified: Vec::new(), rejected: Vec::new(), manual_review: Vec::new(), next_id: 1 }), event_bus: None }
    }

    /// Attaches the bus the store announces queue transitions on — the
    /// vulnerability-found callback consumed by display and telemetry
    /// surfaces.
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(event);
        }
    }

    pub fn add_pending(&self, title: impl Into<String>, content: impl Into<String>, severity: Severity, vulnerability_type: impl Into<String>, claim_assertion: impl Into<String>, evidence: Evidence) -> Result<String, FindingStoreError> {
        let vulnerability_type = vulnerability_type.into();
        let claim_assertion = claim_assertion.into();

        evidence.validate()?;
        if claim_assertion.len() < 20 {
            return Err(FindingStoreError::ClaimAssertionTooShort);
        }
        let Some(entry) = registry::lookup(&vulnerability_type) else {
            return Err(FindingStoreError::UnknownVulnerabilityType(vulnerability_type));
        };

        // The reporter's control tests must cover every required test for
        // this type; names compare after normalization.
        let reported = evidence.normalized_control_test_names();
        let missing: Vec<String> = entry
            .required_control_tests
            .iter()
            .map(|t| normalize_control_test_name(&t.name))
            .filter(|required| !reported.contains(required))
            .collect();
        if !missing.is_empty() {
            return Err(FindingStoreError::MissingRequiredControlTests(missing));
        }

        let title = title.into();
        let id = {
            let mut q = self.lock();
            let id = format!("vuln-{:04}", q.next_id);
            q.next_id += 1;
            let now = Utc::now();
            q.pending.push(Finding {
                id: id.clone(),
                title: title.clone(),
                content: content.into(),
                severity,
                vulnerability_type,
                claim_assertion,
                evidence,
                status: FindingStatus::PendingVerification,
                verification_attempts: 0,
                created_at: now,
                updated_at: now,
                verification_evidence: None,
                rejection_reason: None,
                review_reason: None,
                notes: None,
            });
            id
        };
        tracing::info!(finding_id = %id, severity = ?severity, "finding added to pending queue");
        self.publish(AppEvent::FindingSubmitted { report_id: id.clone(), title, severity: format!("{severity:?}").to_lowercase() });
        Ok(id)
    }

    fn take_pending(q: &mut Queues, id: &str) -> Result<Finding, FindingStoreError> {
        let pos = q.pending.iter().position(|f| f.id == id);
        match pos {
            Some(pos) => Ok(q.pending.remove(pos)),
            None => {
                if Self::find_in(&q.verified, id).is_some() {
                    Err(FindingStoreError::NotPending(id.to_string(), FindingStatus::Verified))
                } else if Self::find_in(&q.rejected, id).is_some() {
                    Err(FindingStoreError::NotPending(id.to_string(), FindingStatus::Rejected))
                } else if Self::find_in(&q.manual_review, id).is_some() {
                    Err(FindingStoreError::NotPending(id.to_string(), FindingStatus::NeedsManualReview))
                } else {
                    Err(FindingStoreError::NotFound(id.to_string()))
                }
            }
        }
    }

    fn find_in(list: &[Finding], id: &str) -> Option<usize> {
        list.iter().position(|f| f.id == id)
    }

    pub fn finalize(&self, id: &str, verification_evidence: impl Into<String>, notes: Option<String>) -> Result<(), FindingStoreError> {
        {
            let mut q = self.lock();
            let mut finding = Self::take_pending(&mut q, id)?;
            finding.status = FindingStatus::Verified;
            finding.updated_at = Utc::now();
            finding.verification_evidence = Some(verification_evidence.into());
            finding.notes = notes;
            q.verified.push(finding);
        }
        tracing::info!(finding_id = %id, "finding verified");
        self.publish(AppEvent::FindingVerified { report_id: id.to_string() });
        Ok(())
    }

    pub fn reject(&self, id: &str, reason: impl Into<String>, notes: Option<String>) -> Result<(), FindingStoreError> {
        let reason = reason.into();
        {
            let mut q = self.lock();
            let mut finding = Self::take_pending(&mut q, id)?;
            finding.status = FindingStatus::Rejected;
            finding.updated_at = Utc::now();
            finding.rejection_reason = Some(reason.clone());
            finding.notes = notes;
            q.rejected.push(finding);
        }
        tracing::info!(finding_id = %id, reason = %reason, "finding rejected");
        self.publish(AppEvent::FindingRejected { report_id: id.to_string(), reason });
        Ok(())
    }

    pub fn add_to_manual_review(&self, id: &str, reason: impl Into<String>, notes: Option<String>) -> Result<(), FindingStoreError> {
        let reason = reason.into();
        {
            let mut q = self.lock();
            let mut finding = Self::take_pending(&mut q, id)?;
            finding.status = FindingStatus::NeedsManualReview;
            finding.updated_at = Utc::now();
            finding.review_reason = Some(reason.clone());
            finding.notes = notes;
            q.manual_review.push(finding);
        }
        tracing::warn!(finding_id = %id, reason = %reason, "finding routed to manual review");
        self.publish(AppEvent::FindingNeedsManualReview { report_id: id.to_string(), reason });
        Ok(())
    }

    /// True iff `id` is not pending and exists in a terminal queue. Unknown
    /// ids are false.
    pub fn is_report_verified(&self, id: &str) -> bool {
        let q = self.lock();
        Self::find_in(&q.pending, id).is_none()
            && (Self::find_in(&q.verified, id).is_some() || Self::find_in(&q.rejected, id).is_some() || Self::find_in(&q.manual_review, id).is_some())
    }

    pub fn increment_verification_attempt(&self, id: &str) -> Result<u32, FindingStoreError> {
        let mut q = self.lock();
        let finding = q.pending.iter_mut().find(|f| f.id == id).ok_or_else(|| FindingStoreError::NotFound(id.to_string()))?;
        finding.verification_attempts += 1;
        finding.updated_at = Utc::now();
        Ok(finding.verification_attempts)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn verified_count(&self) -> usize {
        self.lock().verified.len()
    }

    pub fn rejected_count(&self) -> usize {
        self.lock().rejected.len()
    }

    pub fn manual_review_count(&self) -> usize {
        self.lock().manual_review.len()
    }

    /// Vulnerability type of a still-pending finding, if it exists; used by
    /// the verification orchestrator to resolve the required control tests
    /// before a decision is recorded.
    pub fn pending_vulnerability_type(&self, id: &str) -> Option<String> {
        self.lock().pending.iter().find(|f| f.id == id).map(|f| f.vulnerability_type.clone())
    }

    pub fn normalized_required_tests(&self, vulnerability_type: &str) -> Vec<String> {
        registry::lookup(vulnerability_type)
            .map(|entry| entry.required_control_tests.iter().map(|t| normalize_control_test_name(&t.name)).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> FindingQueuesSnapshot {
        let q = self.lock();
        FindingQueuesSnapshot {
            pending: q.pending.clone(),
            verified: q.verified.clone(),
            rejected: q.rejected.clone(),
            manual_review: q.manual_review.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FindingStore {
    fn default() -> Self {
        Self::new()
    }
}
