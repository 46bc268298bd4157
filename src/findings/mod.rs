pub mod evidence;
pub mod registry;
pub mod store;

pub use evidence::{ControlTestConclusion, ControlTestResult, Evidence, EvidenceError, HttpExchange, ReproductionStep, normalize_control_test_name};
pub use registry::{RequiredControlTest, VulnerabilityTypeEntry, all_type_ids, lookup};
pub use store::{Finding, FindingQueuesSnapshot, FindingStatus, FindingStore, FindingStoreError, Severity};
