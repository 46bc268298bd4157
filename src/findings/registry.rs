//! Vulnerability Type Registry: a closed catalog of the finding
//! types this crate recognizes and the control tests a verifier must run
//! against each. Shipped as a read-only YAML data file embedded at compile
//! time; the process never mutates it.

use std::sync::OnceLock;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredControlTest {
    pub name: String,
    pub description: String,
    pub how_to_test: String,
    pub success_criteria: String,
    pub failure_indicates: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VulnerabilityTypeEntry {
    pub type_id: String,
    pub display_name: String,
    pub semantic_claim: String,
    pub required_control_tests: Vec<RequiredControlTest>,
    pub validity_criteria: Vec<String>,
    pub false_positive_patterns: Vec<String>,
}

const REGISTRY_YAML: &str = include_str!("../../data/vulnerability_types.yaml");

fn registry() -> &'static [VulnerabilityTypeEntry] {
    static REGISTRY: OnceLock<Vec<VulnerabilityTypeEntry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        serde_yaml::from_str(REGISTRY_YAML)
            .unwrap_or_else(|e| panic!("embedded vulnerability type registry is malformed: {e}"))
    })
}

pub fn lookup(type_id: &str) -> Option<&'static VulnerabilityTypeEntry> {
    registry().iter().find(|e| e.type_id == type_id)
}

pub fn all_type_ids() -> Vec<&'static str> {
    registry().iter().map(|e| e.type_id.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_type() {
        let entry = lookup("reflected_xss").unwrap();
        assert_eq!(entry.display_name, "Reflected Cross-Site Scripting");
        assert_eq!(entry.required_control_tests.len(), 1);
    }

    #[test]
    fn lookup_unknown_type_is_none() {
        assert!(lookup("not_a_real_type").is_none());
    }

    #[test]
    fn all_entries_have_at_least_one_control_test() {
        for id in all_type_ids() {
            let entry = lookup(id).unwrap();
            assert!(!entry.required_control_tests.is_empty());
        }
    }

    #[test]
    fn sql_injection_requires_both_controls() {
        let entry = lookup("sql_injection").unwrap();
        let names: Vec<&str> = entry.required_control_tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["boolean_differential_control", "time_delay_control"]);
    }
}
