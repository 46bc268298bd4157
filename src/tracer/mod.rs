//! Tracer — the process-wide owner of the four finding queues, plus the
//! run-artifact writer.
//!
//! The Scan Controller builds one Tracer per process; everything else
//! reaches the queues through [`Tracer::store`]. On flush, the tracer writes
//! a run directory containing the final markdown report, one markdown file
//! per verified finding, a CSV index, and JSON dumps of the non-verified
//! queues. The directory layout is a convenience for human reviewers, not a
//! stable interface.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::event_bus::EventBus;
use crate::findings::{Finding, FindingQueuesSnapshot, FindingStore};

pub struct Tracer {
    store: Arc<FindingStore>,
    run_dir: Option<PathBuf>,
    final_report: Mutex<Option<String>>,
    started_at: DateTime<Utc>,
}

impl Tracer {
    /// `run_dir = None` keeps the tracer in-memory only (tests, embedders
    /// that persist elsewhere).
    pub fn new(run_dir: Option<PathBuf>, event_bus: Option<Arc<dyn EventBus>>) -> Self {
        let store = match event_bus {
            Some(bus) => FindingStore::new().with_event_bus(bus),
            None => FindingStore::new(),
        };
        Self { store: Arc::new(store), run_dir, final_report: Mutex::new(None), started_at: Utc::now() }
    }

    pub fn store(&self) -> Arc<FindingStore> {
        Arc::clone(&self.store)
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    /// Records the content a successful `finish_scan` supplied.
    pub fn set_final_report(&self, content: impl Into<String>) {
        *self.final_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(content.into());
    }

    pub fn final_report(&self) -> Option<String> {
        self.final_report.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Writes the run artifacts. A tracer with no run directory flushes to
    /// nowhere and reports success.
    pub fn flush(&self) -> std::io::Result<()> {
        let Some(dir) = &self.run_dir else { return Ok(()) };
        let snapshot = self.store.snapshot();

        fs::create_dir_all(dir)?;
        fs::write(dir.join("report.md"), self.render_report(&snapshot))?;

        let findings_dir = dir.join("findings");
        fs::create_dir_all(&findings_dir)?;
        for finding in &snapshot.verified {
            fs::write(findings_dir.join(format!("{}.md", finding.id)), render_finding_markdown(finding))?;
        }

        fs::write(dir.join("findings.csv"), render_csv(&snapshot))?;
        fs::write(dir.join("pending.json"), serde_json::to_string_pretty(&snapshot.pending).unwrap_or_default())?;
        fs::write(dir.join("rejected.json"), serde_json::to_string_pretty(&snapshot.rejected).unwrap_or_default())?;
        fs::write(dir.join("manual_review.json"), serde_json::to_string_pretty(&snapshot.manual_review).unwrap_or_default())?;

        tracing::info!(run_dir = %dir.display(), verified = snapshot.verified.len(), "run artifacts flushed");
        Ok(())
    }

    fn render_report(&self, snapshot: &FindingQueuesSnapshot) -> String {
        let mut out = String::new();
        out.push_str("# Assessment report\n\n");
        out.push_str(&format!("Started: {}\n\n", self.started_at.to_rfc3339()));
        out.push_str(&format!(
            "Findings: {} verified, {} rejected, {} awaiting manual review, {} still pending.\n\n",
            snapshot.verified.len(),
            snapshot.rejected.len(),
            snapshot.manual_review.len(),
            snapshot.pending.len()
        ));
        if let Some(report) = self.final_report() {
            out.push_str(&report);
            out.push('\n');
        }
        if !snapshot.verified.is_empty() {
            out.push_str("\n## Verified findings\n\n");
            for finding in &snapshot.verified {
                out.push_str(&format!("- {} — {} ({:?})\n", finding.id, finding.title, finding.severity));
            }
        }
        out
    }
}

fn render_finding_markdown(finding: &Finding) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} — {}\n\n", finding.id, finding.title));
    out.push_str(&format!("- Severity: {:?}\n", finding.severity));
    out.push_str(&format!("- Type: {}\n", finding.vulnerability_type));
    out.push_str(&format!("- Target: {}\n", finding.evidence.target_url));
    out.push_str(&format!("- Claim: {}\n\n", finding.claim_assertion));
    out.push_str(&finding.content);
    out.push_str("\n\n## Proof of concept\n\n```\n");
    out.push_str(&finding.evidence.poc_payload);
    out.push_str("\n```\n\n## Reproduction steps\n\n");
    for step in &finding.evidence.reproduction_steps {
        out.push_str(&format!("{}. {} (expected: {}; actual: {})\n", step.step_number, step.description, step.expected, step.actual));
    }
    if let Some(verification) = &finding.verification_evidence {
        out.push_str("\n## Verification\n\n");
        out.push_str(verification);
        out.push('\n');
    }
    out
}

fn render_csv(snapshot: &FindingQueuesSnapshot) -> String {
    let mut out = String::from("id,status,severity,type,title\n");
    let all = snapshot
        .pending
        .iter()
        .chain(&snapshot.verified)
        .chain(&snapshot.rejected)
        .chain(&snapshot.manual_review);
    for finding in all {
        out.push_str(&format!(
            "{},{:?},{:?},{},{}\n",
            finding.id,
            finding.status,
            finding.severity,
            finding.vulnerability_type,
            finding.title.replace(',', ";")
        ));
    }
    out
}
