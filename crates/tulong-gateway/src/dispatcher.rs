use std::sync::Arc;

use tokio::sync::broadcast;

use tulong_types::events::GatewayEvent;

/// Fans gateway events out to every connected client. Each connection
/// subscribes and applies its own conversation filter; there is no replay
/// buffer: a receiver that lags simply loses the missed window, matching
/// the no-buffering delivery contract of chat views.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events. All connected clients receive
    /// all events and filter locally.
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message_event(conversation_id: Uuid) -> GatewayEvent {
        GatewayEvent::MessageCreate {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Uuid::new_v4(),
            sender_name: "juan".into(),
            content: "on my way".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_event() {
        let dispatcher = Dispatcher::new();
        let mut rx_a = dispatcher.subscribe();
        let mut rx_b = dispatcher.subscribe();

        let conversation = Uuid::new_v4();
        dispatcher.broadcast(message_event(conversation));

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.conversation_id(), Some(conversation));
        }
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let dispatcher = Dispatcher::new();
        dispatcher.broadcast(message_event(Uuid::new_v4()));
    }
}
