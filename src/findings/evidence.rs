//! Evidence shape a finding must carry before it enters the pending queue,
//! and the normalization rules control-test names are compared under.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: Vec<(String, String)>,
    #[serde(default)]
    pub request_body: String,
    pub response_status: u16,
    #[serde(default)]
    pub response_headers: Vec<(String, String)>,
    #[serde(default)]
    pub response_body_snippet: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproductionStep {
    pub step_number: u32,
    pub description: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlTestConclusion {
    Vulnerable,
    NotVulnerable,
    Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlTestResult {
    pub name: String,
    pub description: String,
    pub request: String,
    pub expected_if_vulnerable: String,
    pub expected_if_not_vulnerable: String,
    pub actual: String,
    pub conclusion: ControlTestConclusion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub http_exchanges: Vec<HttpExchange>,
    pub reproduction_steps: Vec<ReproductionStep>,
    pub poc_payload: String,
    pub target_url: String,
    pub negative_control_passed: bool,
    pub negative_control_description: String,
    pub reporter_control_tests: Vec<ControlTestResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    NoHttpExchange,
    NoReproductionSteps,
    NegativeControlNotPassed,
    NegativeControlDescriptionTooShort,
    NoControlTests,
    ControlTestNotVulnerable(String),
}

impl std::fmt::Display for EvidenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHttpExchange => write!(f, "evidence must include at least one HTTP exchange"),
            Self::NoReproductionSteps => write!(f, "evidence must include at least one reproduction step"),
            Self::NegativeControlNotPassed => write!(f, "negative_control_passed must be true"),
            Self::NegativeControlDescriptionTooShort => write!(f, "negative control description must be at least 20 characters"),
            Self::NoControlTests => write!(f, "evidence must include at least one reporter control test"),
            Self::ControlTestNotVulnerable(name) => write!(f, "control test '{name}' did not conclude vulnerable"),
        }
    }
}

impl std::error::Error for EvidenceError {}

/// Normalizes a control-test name for comparison against the registry
///: lowercase, and spaces/hyphens collapsed to underscores.
pub fn normalize_control_test_name(name: &str) -> String {
    name.to_lowercase().replace(['-', ' '], "_")
}

impl Evidence {
    /// Structural validation independent of the vulnerability type's
    /// required control-test list. Type-specific overlap
    /// checking is performed by the verification orchestrator.
    pub fn validate(&self) -> Result<(), EvidenceError> {
        if self.http_exchanges.is_empty() {
            return Err(EvidenceError::NoHttpExchange);
        }
        if self.reproduction_steps.is_empty() {
            return Err(EvidenceError::NoReproductionSteps);
        }
        if !self.negative_control_passed {
            return Err(EvidenceError::NegativeControlNotPassed);
        }
        if self.negative_control_description.len() < 20 {
            return Err(EvidenceError::NegativeControlDescriptionTooShort);
        }
        if self.reporter_control_tests.is_empty() {
            return Err(EvidenceError::NoControlTests);
        }
        for test in &self.reporter_control_tests {
            if test.conclusion != ControlTestConclusion::Vulnerable {
                return Err(EvidenceError::ControlTestNotVulnerable(test.name.clone()));
            }
        }
        Ok(())
    }

    pub fn normalized_control_test_names(&self) -> Vec<String> {
        self.reporter_control_tests.iter().map(|t| normalize_control_test_name(&t.name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_evidence() -> Evidence {
        Evidence {
            http_exchanges: vec![HttpExchange {
                method: "GET".into(),
                url: "https://example.test/?q=<script>".into(),
                request_headers: vec![],
                request_body: String::new(),
                response_status: 200,
                response_headers: vec![],
                response_body_snippet: "<script>".into(),
                timestamp: "2026-08-01T00:00:00Z".into(),
            }],
            reproduction_steps: vec![ReproductionStep { step_number: 1, description: "send payload".into(), expected: "reflected unescaped".into(), actual: "reflected unescaped".into() }],
            poc_payload: "<script>alert(1)</script>".into(),
            target_url: "https://example.test/".into(),
            negative_control_passed: true,
            negative_control_description: "Baseline request without payload returns no script tag in response".into(),
            reporter_control_tests: vec![ControlTestResult {
                name: "Reflected XSS Control".into(),
                description: "Checks reflection".into(),
                request: "GET /?q=<script>".into(),
                expected_if_vulnerable: "script executes".into(),
                expected_if_not_vulnerable: "script escaped".into(),
                actual: "script executes".into(),
                conclusion: ControlTestConclusion::Vulnerable,
            }],
        }
    }

    #[test]
    fn valid_evidence_passes() {
        assert!(valid_evidence().validate().is_ok());
    }

    #[test]
    fn missing_negative_control_fails() {
        let mut e = valid_evidence();
        e.negative_control_passed = false;
        assert_eq!(e.validate(), Err(EvidenceError::NegativeControlNotPassed));
    }

    #[test]
    fn non_vulnerable_control_test_fails() {
        let mut e = valid_evidence();
        e.reporter_control_tests[0].conclusion = ControlTestConclusion::Inconclusive;
        assert!(matches!(e.validate(), Err(EvidenceError::ControlTestNotVulnerable(_))));
    }

    #[test]
    fn normalization_collapses_variants() {
        assert_eq!(normalize_control_test_name("Reflected XSS Control"), "reflected_xss_control");
        assert_eq!(normalize_control_test_name("reflected-xss-control"), "reflected_xss_control");
    }
}
