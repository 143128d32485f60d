//! Delivery fan-out
//!
//! Addresses committed state changes to recipients. No permission checks
//! happen here: callers pass an already-authorized conversation snapshot and
//! the router only picks the audience and hands the event to the transport.
//! Failures are logged and counted, never returned.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::events::DeliveryEvent;
use super::transport::Transport;
use crate::data::Conversation;
use crate::metrics::{FANOUT_DELIVERIES_TOTAL, FANOUT_FAILURES_TOTAL};

#[derive(Clone)]
pub struct Fanout {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Fanout {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Active participants the event should reach
    pub fn audience(conversation: &Conversation, event: &DeliveryEvent) -> Vec<String> {
        let now = Utc::now();
        let reaches_muted = event.reaches_muted();
        conversation
            .active_participants()
            .filter(|p| reaches_muted || !p.is_muted_at(now))
            .map(|p| p.user_id.clone())
            .collect()
    }

    /// Deliver to a single user
    pub async fn to_user(&self, user_id: &str, event: DeliveryEvent) {
        let name = event.name();
        let result =
            tokio::time::timeout(self.timeout, self.transport.emit_to_user(user_id, &event)).await;
        self.record(name, user_id, result);
    }

    /// Broadcast to every active participant, honoring mute
    pub async fn to_conversation(&self, conversation: &Conversation, event: DeliveryEvent) {
        let audience = Self::audience(conversation, &event);
        if audience.is_empty() {
            return;
        }

        let name = event.name();
        let result = tokio::time::timeout(
            self.timeout,
            self.transport
                .emit_to_conversation(&conversation.id, &audience, &event),
        )
        .await;
        self.record(name, &conversation.id, result);
    }

    fn record(
        &self,
        name: &'static str,
        target: &str,
        result: Result<Result<(), super::DeliveryError>, tokio::time::error::Elapsed>,
    ) {
        match result {
            Ok(Ok(())) => {
                FANOUT_DELIVERIES_TOTAL.with_label_values(&[name]).inc();
            }
            Ok(Err(error)) => {
                FANOUT_FAILURES_TOTAL.with_label_values(&[name]).inc();
                tracing::warn!(event = name, %target, %error, "Real-time delivery failed");
            }
            Err(_) => {
                FANOUT_FAILURES_TOTAL.with_label_values(&[name]).inc();
                tracing::warn!(
                    event = name,
                    %target,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Real-time delivery timed out"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ConversationKind, Participant, ParticipantRole};
    use crate::delivery::DeliveryError;
    use crate::delivery::transport::MockTransport;
    use chrono::Duration as ChronoDuration;

    fn participant(user_id: &str, muted: bool, left: bool) -> Participant {
        Participant {
            conversation_id: "c1".to_string(),
            user_id: user_id.to_string(),
            role: ParticipantRole::Member,
            joined_at: Utc::now(),
            left_at: left.then(Utc::now),
            is_muted: muted,
            muted_until: None,
            is_archived: false,
            last_read_message_id: None,
        }
    }

    fn group() -> Conversation {
        let now = Utc::now();
        Conversation {
            id: "c1".to_string(),
            kind: ConversationKind::Group,
            name: Some("Peer circle".to_string()),
            description: None,
            created_by: "alice".to_string(),
            owner_id: "alice".to_string(),
            private_key: None,
            last_message_id: None,
            last_activity: now,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            participants: vec![
                participant("alice", false, false),
                participant("bob", true, false),
                participant("carol", false, true),
            ],
        }
    }

    fn pinned() -> DeliveryEvent {
        DeliveryEvent::MessagePinned {
            message_id: "m1".to_string(),
            by: "alice".to_string(),
        }
    }

    #[test]
    fn audience_skips_left_and_muted_for_message_traffic() {
        assert_eq!(Fanout::audience(&group(), &pinned()), vec!["alice".to_string()]);
    }

    #[test]
    fn audience_includes_muted_for_membership_changes() {
        let removed = DeliveryEvent::ParticipantRemoved {
            conversation_id: "c1".to_string(),
            user_id: "bob".to_string(),
            removed_by: "alice".to_string(),
        };
        assert_eq!(
            Fanout::audience(&group(), &removed),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn lapsed_mute_receives_message_traffic() {
        let mut conversation = group();
        conversation.participants[1].muted_until = Some(Utc::now() - ChronoDuration::minutes(5));
        assert_eq!(Fanout::audience(&conversation, &pinned()).len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_uses_resolved_audience() {
        let mut transport = MockTransport::new();
        transport
            .expect_emit_to_conversation()
            .withf(|conversation_id, audience, event| {
                conversation_id.to_string() == "c1"
                    && audience.len() == 1
                    && audience[0] == "alice"
                    && event.name() == "message-pinned"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let fanout = Fanout::new(Arc::new(transport), Duration::from_secs(1));
        fanout.to_conversation(&group(), pinned()).await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        let mut transport = MockTransport::new();
        transport
            .expect_emit_to_user()
            .times(1)
            .returning(|_, _| Err(DeliveryError::Disconnected));

        let fanout = Fanout::new(Arc::new(transport), Duration::from_secs(1));
        // Completes without surfacing the error
        fanout.to_user("bob", pinned()).await;
    }

    struct StalledTransport;

    #[async_trait::async_trait]
    impl Transport for StalledTransport {
        async fn emit_to_user(
            &self,
            _user_id: &str,
            _event: &DeliveryEvent,
        ) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_transport_is_cut_off_at_timeout() {
        let fanout = Fanout::new(Arc::new(StalledTransport), Duration::from_millis(50));
        let started = std::time::Instant::now();

        fanout.to_conversation(&group(), pinned()).await;
        fanout.to_user("bob", pinned()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_audience_skips_transport() {
        let mut conversation = group();
        conversation.participants.retain(|p| p.user_id == "bob");

        let mut transport = MockTransport::new();
        transport.expect_emit_to_conversation().never();

        let fanout = Fanout::new(Arc::new(transport), Duration::from_secs(1));
        fanout.to_conversation(&conversation, pinned()).await;
    }
}
