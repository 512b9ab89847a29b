use super::message::RealtimeMessage;
use crate::metrics::MetricsRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-organization realtime fan-out.
///
/// Each organization gets its own bounded broadcast channel, created lazily
/// on first use; subscribers joined to one organization never observe
/// another organization's messages. Publishing validates the message first
/// and drops (with a counter) anything that fails; the producer side never
/// crashes or partially delivers. Delivery is at-most-once with no replay.
pub struct EventBus {
    channels: DashMap<Uuid, broadcast::Sender<RealtimeMessage>>,
    capacity: usize,
    metrics: Arc<MetricsRegistry>,
}

impl EventBus {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
            metrics,
        }
    }

    fn sender(&self, organization_id: Uuid) -> broadcast::Sender<RealtimeMessage> {
        self.channels
            .entry(organization_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to one organization's stream. Messages broadcast before
    /// the subscription are not replayed.
    pub fn subscribe(&self, organization_id: Uuid) -> broadcast::Receiver<RealtimeMessage> {
        self.sender(organization_id).subscribe()
    }

    /// Validate and broadcast. Returns the number of subscribers that were
    /// handed the message; invalid messages are dropped and counted, never
    /// propagated as errors to the producer.
    pub fn publish(&self, message: RealtimeMessage) -> usize {
        if let Err(e) = message.validate() {
            warn!(
                message_type = message.type_tag(),
                organization_id = %message.organization_id,
                error = %e,
                "Dropping realtime message that failed schema validation"
            );
            self.metrics
                .realtime_dropped
                .with_label_values(&["schema"])
                .inc();
            return 0;
        }

        let sender = self.sender(message.organization_id);
        match sender.send(message) {
            Ok(subscriber_count) => subscriber_count,
            Err(_) => {
                // No subscribers for this organization right now.
                debug!("Realtime message discarded; no active subscribers");
                0
            }
        }
    }

    /// Number of live subscribers for an organization.
    pub fn subscriber_count(&self, organization_id: Uuid) -> usize {
        self.channels
            .get(&organization_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::message::{NotificationLevel, RealtimePayload};

    fn bus() -> EventBus {
        let metrics = Arc::new(MetricsRegistry::new("singura_test_bus").unwrap());
        EventBus::new(1024, metrics)
    }

    fn notification(organization_id: Uuid, message: &str) -> RealtimeMessage {
        RealtimeMessage::new(
            organization_id,
            RealtimePayload::SystemNotification {
                level: NotificationLevel::Info,
                message: message.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_organization_isolation() {
        let bus = bus();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        let mut sub_a = bus.subscribe(org_a);
        let mut sub_b = bus.subscribe(org_b);

        bus.publish(notification(org_a, "for org a"));

        let received = sub_a.recv().await.unwrap();
        assert_eq!(received.organization_id, org_a);

        // Org B must see nothing.
        assert!(matches!(
            sub_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_rapid_broadcast_delivery() {
        let bus = bus();
        let org = Uuid::new_v4();
        let mut sub = bus.subscribe(org);

        for i in 0..100 {
            bus.publish(notification(org, &format!("message {}", i)));
        }

        let mut received = 0;
        while let Ok(_) = sub.try_recv() {
            received += 1;
        }
        assert!(received >= 95, "expected >= 95 of 100, got {}", received);
    }

    #[tokio::test]
    async fn test_invalid_message_dropped_without_panic() {
        let bus = bus();
        let org = Uuid::new_v4();
        let mut sub = bus.subscribe(org);

        // Empty notification message fails schema validation.
        let delivered = bus.publish(notification(org, ""));
        assert_eq!(delivered, 0);
        assert!(matches!(
            sub.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_emission_order_preserved() {
        let bus = bus();
        let org = Uuid::new_v4();
        let mut sub = bus.subscribe(org);

        for i in 0..10 {
            bus.publish(notification(org, &format!("{}", i)));
        }

        for i in 0..10 {
            let msg = sub.recv().await.unwrap();
            match msg.payload {
                RealtimePayload::SystemNotification { message, .. } => {
                    assert_eq!(message, format!("{}", i));
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }
}
