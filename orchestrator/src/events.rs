//! Broadcast bus for host notifications

use proxy_common::ProxyEvent;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProxyEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; events without subscribers are dropped
    pub fn publish(&self, event: ProxyEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_common::RequestStatus;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ProxyEvent::RequestStatusChanged {
            request_id: "r1".to_string(),
            artifact_id: "a1".to_string(),
            status: RequestStatus::Pending,
        });

        match rx.recv().await.unwrap() {
            ProxyEvent::RequestStatusChanged { request_id, status, .. } => {
                assert_eq!(request_id, "r1");
                assert_eq!(status, RequestStatus::Pending);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(ProxyEvent::RateLimitWarning {
            artifact_id: "a".to_string(),
            domain: "example.com".to_string(),
            remaining: 1,
            limit: 10,
        });
    }
}
