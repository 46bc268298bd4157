use tokio::sync::broadcast;

use super::traits::{AppEvent, EventBus, EventFilter};

const DEFAULT_CAPACITY: usize = 1024;

/// [`EventBus`] implementation backed by a `tokio::sync::broadcast` channel.
/// One instance is shared by the Scan Controller, the Finding Store, and the
/// agent spawner; display surfaces subscribe and render.
pub struct TokioBroadcastBus {
    sender: broadcast::Sender<AppEvent>,
    capacity: usize,
}

impl TokioBroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A subscriber that falls more than `capacity` events behind starts
    /// receiving `Lagged` errors; pick the capacity for the burstiest
    /// producer (a parallel tool wave emits one event per invocation).
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TokioBroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for TokioBroadcastBus {
    fn publish(&self, event: AppEvent) -> Result<(), String> {
        tracing::trace!(event = ?event, "publishing scan event");
        // send() errors only when there are zero receivers, which is normal
        // for a headless run; drop the event silently in that case.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    fn subscribe_filtered(&self, _filter: EventFilter) -> broadcast::Receiver<AppEvent> {
        // The underlying broadcast channel delivers all events; consumers
        // apply EventFilter::matches() to discard unwanted messages.
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::traits::EventType;

    #[tokio::test]
    async fn finding_events_reach_every_subscriber() {
        let bus = TokioBroadcastBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(AppEvent::FindingSubmitted { report_id: "vuln-0001".into(), title: "XSS in q".into(), severity: "high".into() }).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                AppEvent::FindingSubmitted { report_id, .. } => assert_eq!(report_id, "vuln-0001"),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = TokioBroadcastBus::new();
        assert!(bus.publish(AppEvent::ScanStarted { target: "https://example.test".into() }).is_ok());
    }

    #[tokio::test]
    async fn filtered_subscription_still_sees_all_events_and_filter_selects() {
        let bus = TokioBroadcastBus::new();
        let filter = EventFilter::new(vec![EventType::FindingVerified]);
        let mut rx = bus.subscribe_filtered(filter.clone());

        bus.publish(AppEvent::ScanStarted { target: "https://example.test".into() }).unwrap();
        bus.publish(AppEvent::FindingVerified { report_id: "vuln-0001".into() }).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(!filter.matches(&first));
        let second = rx.recv().await.unwrap();
        assert!(filter.matches(&second));
    }

    #[tokio::test]
    async fn lagged_receiver_reports_error() {
        let bus = TokioBroadcastBus::with_capacity(1);
        let mut slow_rx = bus.subscribe();

        bus.publish(AppEvent::ScanStarted { target: "https://example.test".into() }).unwrap();
        bus.publish(AppEvent::ScanCompleted { exit_code: 0 }).unwrap();

        let result = slow_rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))), "expected Lagged, got {result:?}");
    }
}
