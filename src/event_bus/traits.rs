use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// All events that flow through the scan's internal event bus: scan
/// lifecycle, agent lifecycle, tool activity, and finding-queue transitions.
/// Display surfaces and telemetry subscribe; core components publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    ScanStarted {
        target: String,
    },
    ScanCompleted {
        exit_code: i32,
    },
    AgentCreated {
        agent_id: String,
        parent_id: Option<String>,
        name: String,
    },
    AgentStatusChanged {
        agent_id: String,
        status: String,
    },
    AgentToolStart {
        agent_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    AgentToolResult {
        agent_id: String,
        tool_name: String,
        success: bool,
        result: String,
    },
    FindingSubmitted {
        report_id: String,
        title: String,
        severity: String,
    },
    FindingVerified {
        report_id: String,
    },
    FindingRejected {
        report_id: String,
        reason: String,
    },
    FindingNeedsManualReview {
        report_id: String,
        reason: String,
    },
    SystemError {
        message: String,
    },
}

impl AppEvent {
    /// The variant's [`EventType`], for filter matching.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ScanStarted { .. } => EventType::ScanStarted,
            Self::ScanCompleted { .. } => EventType::ScanCompleted,
            Self::AgentCreated { .. } => EventType::AgentCreated,
            Self::AgentStatusChanged { .. } => EventType::AgentStatusChanged,
            Self::AgentToolStart { .. } => EventType::AgentToolStart,
            Self::AgentToolResult { .. } => EventType::AgentToolResult,
            Self::FindingSubmitted { .. } => EventType::FindingSubmitted,
            Self::FindingVerified { .. } => EventType::FindingVerified,
            Self::FindingRejected { .. } => EventType::FindingRejected,
            Self::FindingNeedsManualReview { .. } => EventType::FindingNeedsManualReview,
            Self::SystemError { .. } => EventType::SystemError,
        }
    }
}

/// Selects which event variants a subscriber is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ScanStarted,
    ScanCompleted,
    AgentCreated,
    AgentStatusChanged,
    AgentToolStart,
    AgentToolResult,
    FindingSubmitted,
    FindingVerified,
    FindingRejected,
    FindingNeedsManualReview,
    SystemError,
    /// Matches every variant.
    All,
}

impl EventType {
    pub fn matches(&self, event: &AppEvent) -> bool {
        *self == Self::All || *self == event.event_type()
    }
}

/// A set of event types used for filtering subscriptions.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &AppEvent) -> bool {
        self.event_types.iter().any(|t| t.matches(event))
    }
}

/// Central pub/sub bus for scan events.
///
/// All returned `Receiver`s receive every published event; callers are
/// responsible for filtering if they subscribed via `subscribe_filtered`.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: AppEvent) -> Result<(), String>;

    fn subscribe(&self) -> broadcast::Receiver<AppEvent>;

    /// Subscribe to events, pre-scoped to the given filter. The returned
    /// receiver still carries all events; consumers call
    /// [`EventFilter::matches`] to discard unwanted ones.
    fn subscribe_filtered(&self, filter: EventFilter) -> broadcast::Receiver<AppEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_matches() {
        let event = AppEvent::FindingVerified { report_id: "vuln-0001".into() };
        assert!(EventType::FindingVerified.matches(&event));
        assert!(EventType::All.matches(&event));
        assert!(!EventType::ScanStarted.matches(&event));
    }

    #[test]
    fn filter_matches_any_listed_type() {
        let filter = EventFilter::new(vec![EventType::ScanStarted, EventType::ScanCompleted]);
        assert!(filter.matches(&AppEvent::ScanCompleted { exit_code: 0 }));
        assert!(!filter.matches(&AppEvent::SystemError { message: "x".into() }));
    }
}
