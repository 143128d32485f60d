//! Real-time event catalogue
//!
//! Every committed state change maps to exactly one variant. The wire name
//! of a variant is its kebab-case form (`NewMessage` -> `new-message`).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::{Conversation, Message, ModerationAction, Notification, NotificationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Outbound event, serialized as `{"event": <name>, "payload": {...}}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum DeliveryEvent {
    // ============================================================
    // Message events (conversation audience)
    // ============================================================
    #[serde(rename_all = "camelCase")]
    NewMessage {
        message: Box<Message>,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        message_id: String,
        new_content: String,
        edited_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: String,
        deleted_by: String,
        delete_for_everyone: bool,
    },
    /// Reaction delta, not the whole message
    #[serde(rename_all = "camelCase")]
    MessageReaction {
        message_id: String,
        user_id: String,
        emoji: String,
        action: ReactionAction,
    },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        message_id: String,
        read_by: String,
        read_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessagePinned { message_id: String, by: String },
    #[serde(rename_all = "camelCase")]
    MessageUnpinned { message_id: String, by: String },
    #[serde(rename_all = "camelCase")]
    MessageModerated {
        message_id: String,
        action: ModerationAction,
    },

    // ============================================================
    // Conversation lifecycle
    // ============================================================
    #[serde(rename_all = "camelCase")]
    ConversationCreated { conversation: Box<Conversation> },
    #[serde(rename_all = "camelCase")]
    ConversationUpdated { conversation: Box<Conversation> },
    #[serde(rename_all = "camelCase")]
    ConversationDeleted {
        conversation_id: String,
        deleted_by: String,
    },
    #[serde(rename_all = "camelCase")]
    ConversationRead {
        conversation_id: String,
        user_id: String,
        last_read_message_id: Option<String>,
        read_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    OwnershipTransferred {
        conversation_id: String,
        previous_owner: String,
        new_owner: String,
    },

    // ============================================================
    // Membership
    // ============================================================
    #[serde(rename_all = "camelCase")]
    ParticipantAdded {
        conversation_id: String,
        user_id: String,
        added_by: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantRemoved {
        conversation_id: String,
        user_id: String,
        removed_by: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        conversation_id: String,
        user_id: String,
    },
    /// Sent to the removed user only
    #[serde(rename_all = "camelCase")]
    RemovedFromConversation {
        conversation_id: String,
        removed_by: String,
    },

    // ============================================================
    // Single user
    // ============================================================
    Notification {
        id: String,
        #[serde(rename = "type")]
        kind: NotificationKind,
        title: String,
        message: String,
        data: serde_json::Value,
    },
}

impl DeliveryEvent {
    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new-message",
            Self::MessageEdited { .. } => "message-edited",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::MessageReaction { .. } => "message-reaction",
            Self::MessageRead { .. } => "message-read",
            Self::MessagePinned { .. } => "message-pinned",
            Self::MessageUnpinned { .. } => "message-unpinned",
            Self::MessageModerated { .. } => "message-moderated",
            Self::ConversationCreated { .. } => "conversation-created",
            Self::ConversationUpdated { .. } => "conversation-updated",
            Self::ConversationDeleted { .. } => "conversation-deleted",
            Self::ConversationRead { .. } => "conversation-read",
            Self::OwnershipTransferred { .. } => "ownership-transferred",
            Self::ParticipantAdded { .. } => "participant-added",
            Self::ParticipantRemoved { .. } => "participant-removed",
            Self::ParticipantLeft { .. } => "participant-left",
            Self::RemovedFromConversation { .. } => "removed-from-conversation",
            Self::Notification { .. } => "notification",
        }
    }

    /// Whether a conversation broadcast of this event also reaches muted
    /// participants. Mute silences ordinary message traffic only.
    pub fn reaches_muted(&self) -> bool {
        matches!(
            self,
            Self::ConversationCreated { .. }
                | Self::ConversationUpdated { .. }
                | Self::ConversationDeleted { .. }
                | Self::OwnershipTransferred { .. }
                | Self::ParticipantAdded { .. }
                | Self::ParticipantRemoved { .. }
                | Self::ParticipantLeft { .. }
                | Self::RemovedFromConversation { .. }
        )
    }

    /// The payload object without the envelope
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut envelope)) => envelope
                .remove("payload")
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        }
    }
}

impl From<&Notification> for DeliveryEvent {
    fn from(notification: &Notification) -> Self {
        Self::Notification {
            id: notification.id.clone(),
            kind: notification.kind,
            title: notification.title.clone(),
            message: notification.message.clone(),
            data: notification.data.0.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_kebab_case_names_and_camel_case_fields() {
        let event = DeliveryEvent::MessageDeleted {
            message_id: "m1".to_string(),
            deleted_by: "alice".to_string(),
            delete_for_everyone: true,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["messageId"], "m1");
        assert_eq!(json["payload"]["deleteForEveryone"], true);
        assert_eq!(event.payload()["deletedBy"], "alice");
    }

    #[test]
    fn reaction_delta_carries_action() {
        let event = DeliveryEvent::MessageReaction {
            message_id: "m1".to_string(),
            user_id: "bob".to_string(),
            emoji: "👍".to_string(),
            action: ReactionAction::Remove,
        };
        assert_eq!(event.payload()["action"], "remove");
        assert!(!event.reaches_muted());
    }

    #[test]
    fn membership_changes_reach_muted_participants() {
        let removed = DeliveryEvent::ParticipantRemoved {
            conversation_id: "c1".to_string(),
            user_id: "bob".to_string(),
            removed_by: "alice".to_string(),
        };
        assert!(removed.reaches_muted());
        assert_eq!(removed.name(), "participant-removed");
    }
}
