//! Transport seam and the in-process event hub
//!
//! The core only assumes `emit_to_user` / `emit_to_conversation` primitives
//! with no delivery guarantee. `EventHub` is the bundled implementation: one
//! broadcast channel per connected user, drained by the SSE endpoint.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use super::DeliveryError;
use super::events::DeliveryEvent;

/// Carries events to connected clients
///
/// Emits are awaited inside the request that committed the change, bounded
/// by `delivery.timeout_seconds`, so that events for one conversation leave
/// in commit order. Implementations must hand the event off and return
/// without waiting on the client; a slow emit delays the sender's response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit_to_user(&self, user_id: &str, event: &DeliveryEvent) -> Result<(), DeliveryError>;

    /// Broadcast to an already-resolved audience of a conversation
    async fn emit_to_conversation(
        &self,
        conversation_id: &str,
        audience: &[String],
        event: &DeliveryEvent,
    ) -> Result<(), DeliveryError> {
        let mut failed = 0usize;
        for user_id in audience {
            if let Err(error) = self.emit_to_user(user_id, event).await {
                tracing::debug!(%conversation_id, %user_id, %error, "emit to participant failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(DeliveryError::Partial {
                failed,
                total: audience.len(),
            });
        }
        Ok(())
    }
}

/// In-process transport backed by per-user broadcast channels
pub struct EventHub {
    channels: RwLock<HashMap<String, broadcast::Sender<Arc<DeliveryEvent>>>>,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to the user's events; several streams per user are allowed
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Arc<DeliveryEvent>> {
        let mut guard = self.channels.write().await;
        let sender = guard
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        tracing::debug!(
            %user_id,
            subscribers = sender.receiver_count() + 1,
            "Added event subscriber"
        );
        sender.subscribe()
    }

    /// Number of users with a live channel
    pub async fn connected_users(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn prune(&self, user_id: &str) {
        let mut guard = self.channels.write().await;
        if guard
            .get(user_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            guard.remove(user_id);
            tracing::debug!(%user_id, "Removed idle event channel");
        }
    }
}

#[async_trait]
impl Transport for EventHub {
    async fn emit_to_user(&self, user_id: &str, event: &DeliveryEvent) -> Result<(), DeliveryError> {
        let sender = self.channels.read().await.get(user_id).cloned();
        let Some(sender) = sender else {
            // Offline users simply miss real-time events
            return Ok(());
        };

        if sender.send(Arc::new(event.clone())).is_err() {
            self.prune(user_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> DeliveryEvent {
        DeliveryEvent::MessagePinned {
            message_id: "m1".to_string(),
            by: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe("bob").await;

        hub.emit_to_user("bob", &sample_event()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "message-pinned");
    }

    #[tokio::test]
    async fn test_offline_user_is_not_an_error() {
        let hub = EventHub::new(16);
        assert!(hub.emit_to_user("nobody", &sample_event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_channel_is_pruned() {
        let hub = EventHub::new(16);
        let rx = hub.subscribe("bob").await;
        assert_eq!(hub.connected_users().await, 1);

        drop(rx);
        hub.emit_to_user("bob", &sample_event()).await.unwrap();
        assert_eq!(hub.connected_users().await, 0);
    }

    #[tokio::test]
    async fn test_conversation_emit_reaches_each_member() {
        let hub = EventHub::new(16);
        let mut alice = hub.subscribe("alice").await;
        let mut bob = hub.subscribe("bob").await;

        hub.emit_to_conversation(
            "c1",
            &["alice".to_string(), "bob".to_string()],
            &sample_event(),
        )
        .await
        .unwrap();

        assert!(alice.recv().await.is_ok());
        assert!(bob.recv().await.is_ok());
    }
}
