//! Notification bridge
//!
//! Turns selected delivery events into durable, capped notifications and
//! pushes each new record to its recipient as a `notification` event.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::types::Json;
use std::sync::Arc;

use super::PageRequest;
use crate::data::{
    Conversation, Database, EntityId, Message, Notification, NotificationKind, ViewerCache,
};
use crate::delivery::{DeliveryEvent, Fanout};
use crate::error::AppError;
use crate::metrics::NOTIFICATIONS_CREATED_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotificationKind {
    /// Display title and priority for each kind
    pub fn presentation(&self) -> (&'static str, NotificationPriority) {
        use NotificationPriority::*;
        match self {
            NotificationKind::NewMessage => ("New message", Normal),
            NotificationKind::AddedToConversation => ("Added to conversation", Normal),
            NotificationKind::RemovedFromConversation => ("Removed from conversation", High),
            NotificationKind::ModerationWarning => ("Moderation notice", High),
            NotificationKind::CrisisEscalation => ("Crisis escalation", Urgent),
            NotificationKind::ReportResolved => ("Report resolved", Low),
        }
    }
}

const PREVIEW_CHARS: usize = 100;

fn preview(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

/// Notification service
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
    fanout: Fanout,
    viewers: ViewerCache,
    max_per_recipient: i64,
}

impl NotificationService {
    pub fn new(
        db: Arc<Database>,
        fanout: Fanout,
        viewers: ViewerCache,
        max_per_recipient: usize,
    ) -> Self {
        Self {
            db,
            fanout,
            viewers,
            max_per_recipient: max_per_recipient as i64,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Persist a notification and push it to the recipient
    pub async fn notify(
        &self,
        recipient_id: &str,
        kind: NotificationKind,
        message: String,
        mut data: serde_json::Value,
    ) -> Result<Notification, AppError> {
        let (title, priority) = kind.presentation();
        if let Some(object) = data.as_object_mut() {
            object.insert("priority".to_string(), json!(priority));
        }

        let notification = Notification {
            id: EntityId::new().0,
            recipient_id: recipient_id.to_string(),
            kind,
            title: title.to_string(),
            message,
            data: Json(data),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        };

        let evicted = self
            .db
            .insert_notification(&notification, self.max_per_recipient)
            .await?;
        NOTIFICATIONS_CREATED_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();
        if evicted > 0 {
            tracing::debug!(%recipient_id, evicted, "Evicted oldest notifications over cap");
        }

        self.fanout
            .to_user(recipient_id, DeliveryEvent::from(&notification))
            .await;

        Ok(notification)
    }

    /// New-message notifications for recipients who are not looking
    ///
    /// Skips the sender, muted participants and active viewers. Individual
    /// failures are logged and do not stop the remaining recipients.
    pub async fn notify_new_message(
        &self,
        conversation: &Conversation,
        message: &Message,
        sender_name: &str,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let body = if message.content.is_empty() {
            format!("{} sent an attachment", sender_name)
        } else {
            format!("{}: {}", sender_name, preview(&message.content))
        };

        for participant in conversation.active_participants() {
            if participant.user_id == message.sender_id || participant.is_muted_at(now) {
                continue;
            }
            if self
                .viewers
                .is_viewing(&conversation.id, &participant.user_id)
                .await
            {
                continue;
            }

            let data = json!({
                "conversationId": conversation.id,
                "messageId": message.id,
                "senderId": message.sender_id,
            });
            if let Err(error) = self
                .notify(&participant.user_id, NotificationKind::NewMessage, body.clone(), data)
                .await
            {
                tracing::warn!(
                    recipient_id = %participant.user_id,
                    message_id = %message.id,
                    %error,
                    "Failed to create new-message notification"
                );
            }
        }

        Ok(())
    }

    /// Same notification to many recipients; failures are logged per recipient
    pub async fn notify_many(
        &self,
        recipients: &[String],
        kind: NotificationKind,
        message: String,
        data: serde_json::Value,
    ) -> Result<(), AppError> {
        for recipient in recipients {
            if let Err(error) = self
                .notify(recipient, kind, message.clone(), data.clone())
                .await
            {
                tracing::warn!(recipient_id = %recipient, kind = %kind, %error, "Failed to create notification");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Active viewers
    // =========================================================================

    pub async fn touch_viewer(&self, conversation_id: &str, user_id: &str) {
        self.viewers.touch(conversation_id, user_id).await;
    }

    pub async fn forget_viewer(&self, conversation_id: &str, user_id: &str) {
        self.viewers.forget(conversation_id, user_id).await;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn list(
        &self,
        recipient_id: &str,
        unread_only: bool,
        page: PageRequest,
    ) -> Result<Vec<Notification>, AppError> {
        let (limit, offset) = page.bounds();
        self.db
            .list_notifications(recipient_id, unread_only, limit, offset)
            .await
    }

    pub async fn unread_count(&self, recipient_id: &str) -> Result<i64, AppError> {
        self.db.count_unread_notifications(recipient_id).await
    }

    pub async fn mark_read(&self, id: &str, recipient_id: &str) -> Result<(), AppError> {
        if !self
            .db
            .mark_notification_read(id, recipient_id, Utc::now())
            .await?
        {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64, AppError> {
        self.db
            .mark_all_notifications_read(recipient_id, Utc::now())
            .await
    }

    pub async fn delete(&self, id: &str, recipient_id: &str) -> Result<(), AppError> {
        if !self.db.delete_notification(id, recipient_id).await? {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
