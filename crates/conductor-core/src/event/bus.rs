//! Broadcast event bus for distributing `EngineEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op.

use conductor_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Multi-consumer event bus for workflow lifecycle events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    ///
    /// Sized from `EngineConfig::event_bus_capacity` by the engine builder.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// Never blocks. If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn loaded(name: &str) -> EngineEvent {
        EngineEvent::WorkflowLoaded {
            run_id: Uuid::now_v7(),
            workflow_name: name.to_string(),
            source: None,
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(loaded("deploy"));

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, EngineEvent::WorkflowLoaded { ref workflow_name, .. } if workflow_name == "deploy"));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(loaded("deploy"));

        assert!(matches!(rx1.recv().await.unwrap(), EngineEvent::WorkflowLoaded { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), EngineEvent::WorkflowLoaded { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(loaded("a"));
        bus.publish(loaded("b"));
    }

    #[test]
    fn lagged_receiver_handles_gracefully() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish(loaded(&format!("w{i}")));
        }

        match rx.try_recv() {
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(loaded("deploy"));

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
