//! Message service
//!
//! Send, edit, delete, react, read, pin and forward. The classifier runs
//! inline on every write of message text, before the write is committed;
//! fan-out follows the commit and never fails the request.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::types::Json;
use std::sync::Arc;
use std::time::Duration;

use super::conversation::require_active;
use super::{
    AccountDirectory, ModerationService, NotificationService, PageRequest, spawn_best_effort,
};
use crate::config::{MessagingConfig, PinPolicy};
use crate::data::{
    Conversation, ConversationKind, Database, EntityId, MediaRef, Message, MessageType,
    ModerationAction, ReactionCount, SearchFilter, SearchHistoryEntry,
};
use crate::delivery::{DeliveryEvent, Fanout, ReactionAction};
use crate::error::AppError;
use crate::metrics::{MESSAGE_MUTATIONS_TOTAL, MESSAGES_SENT_TOTAL};
use crate::safety::SafetyClassifier;

const MAX_EMOJI_CHARS: usize = 32;
const MAX_QUERY_CHARS: usize = 200;

/// Whether an action at `now` still falls inside `window_seconds` of
/// `created_at`. The boundary itself is inside.
pub fn within_window(created_at: DateTime<Utc>, now: DateTime<Utc>, window_seconds: i64) -> bool {
    now.signed_duration_since(created_at) <= ChronoDuration::seconds(window_seconds)
}

/// Input for `MessageService::send`
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub content: Option<String>,
    pub message_type: Option<MessageType>,
    pub reply_to: Option<String>,
    pub media: Vec<MediaRef>,
}

/// Message service
#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    accounts: Arc<dyn AccountDirectory>,
    classifier: Arc<SafetyClassifier>,
    fanout: Fanout,
    notifications: NotificationService,
    moderation: ModerationService,
    config: MessagingConfig,
    timeout: Duration,
}

impl MessageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        accounts: Arc<dyn AccountDirectory>,
        classifier: Arc<SafetyClassifier>,
        fanout: Fanout,
        notifications: NotificationService,
        moderation: ModerationService,
        config: MessagingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            accounts,
            classifier,
            fanout,
            notifications,
            moderation,
            config,
            timeout,
        }
    }

    async fn load_conversation(&self, id: &str) -> Result<Conversation, AppError> {
        self.db
            .get_conversation(id)
            .await?
            .filter(|c| !c.is_deleted)
            .ok_or(AppError::NotFound)
    }

    async fn load_message(&self, id: &str) -> Result<Message, AppError> {
        self.db.get_message(id).await?.ok_or(AppError::NotFound)
    }

    /// Message plus its conversation, with the actor checked as active
    async fn load_for_participant(
        &self,
        message_id: &str,
        actor_id: &str,
    ) -> Result<(Message, Conversation), AppError> {
        let message = self.load_message(message_id).await?;
        let conversation = self.load_conversation(&message.conversation_id).await?;
        require_active(&conversation, actor_id)?;

        if message.is_hidden && message.sender_id != actor_id {
            return Err(AppError::NotFound);
        }
        if self.db.is_hidden_for(message_id, actor_id).await? {
            return Err(AppError::NotFound);
        }
        Ok((message, conversation))
    }

    /// Whether either side of a private conversation has blocked the other
    async fn blocked_in(&self, conversation: &Conversation, sender_id: &str) -> Result<bool, AppError> {
        if conversation.kind != ConversationKind::Private {
            return Ok(false);
        }
        for other in conversation
            .participants
            .iter()
            .filter(|p| p.user_id != sender_id)
        {
            if self.accounts.is_blocked(&other.user_id, sender_id).await?
                || self.accounts.is_blocked(sender_id, &other.user_id).await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn validate_content(&self, content: &str) -> Result<(), AppError> {
        let length = content.chars().count();
        if length > self.config.max_content_length {
            return Err(AppError::Validation(format!(
                "Message content must be at most {} characters",
                self.config.max_content_length
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Send and forward
    // =========================================================================

    pub async fn send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        input: SendMessage,
    ) -> Result<Message, AppError> {
        let conversation = self.load_conversation(conversation_id).await?;
        require_active(&conversation, sender_id)?;

        let sender = match self.accounts.resolve_user(sender_id).await? {
            Some(user) if user.is_active => user,
            _ => return Err(AppError::forbidden("Your account cannot send messages")),
        };
        if self.blocked_in(&conversation, sender_id).await? {
            return Err(AppError::forbidden("You cannot message this user"));
        }

        let message_type = input.message_type.unwrap_or(MessageType::Text);
        if message_type == MessageType::System {
            return Err(AppError::validation("System messages cannot be sent by clients"));
        }
        let content = input.content.unwrap_or_default();
        self.validate_content(&content)?;
        if content.trim().is_empty() && input.media.is_empty() {
            return Err(AppError::validation("A message needs content or media"));
        }
        if input.media.len() > self.config.max_media_per_message {
            return Err(AppError::Validation(format!(
                "At most {} media attachments are allowed",
                self.config.max_media_per_message
            )));
        }
        if let Some(reply_to) = &input.reply_to {
            let in_conversation = self
                .db
                .get_message(reply_to)
                .await?
                .is_some_and(|m| m.conversation_id == conversation_id);
            if !in_conversation {
                return Err(AppError::validation(
                    "replyTo must reference a message in the same conversation",
                ));
            }
        }

        let message = self
            .commit(
                &conversation,
                sender_id,
                content,
                message_type,
                input.media,
                input.reply_to,
                None,
            )
            .await?;

        let notifications = self.notifications.clone();
        let snapshot = message.clone();
        spawn_best_effort("new_message_notifications", self.timeout, async move {
            notifications
                .notify_new_message(&conversation, &snapshot, &sender.display_name)
                .await
        });

        Ok(message)
    }

    /// Classify, persist and broadcast a new message
    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        conversation: &Conversation,
        sender_id: &str,
        content: String,
        message_type: MessageType,
        media: Vec<MediaRef>,
        reply_to: Option<String>,
        forwarded_from: Option<String>,
    ) -> Result<Message, AppError> {
        let assessment = self.classifier.assess(Some(&content));
        let safety = assessment.columns();

        let message = Message {
            id: EntityId::new().0,
            conversation_id: conversation.id.clone(),
            sender_id: sender_id.to_string(),
            content,
            message_type,
            media: Json(media),
            reply_to,
            reactions: Vec::new(),
            read_by: Vec::new(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            is_hidden: false,
            is_pinned: false,
            pinned_by: None,
            pinned_at: None,
            is_forwarded: forwarded_from.is_some(),
            forwarded_from,
            crisis_detected: safety.crisis_detected,
            crisis_keywords: Json(safety.crisis_keywords),
            crisis_severity: safety.crisis_severity,
            policy_flags: Json(safety.policy_flags),
            moderation_action: ModerationAction::None,
            moderated_by: None,
            moderated_at: None,
            version: 0,
            created_at: Utc::now(),
        };

        let records = ModerationService::detection_records(&message, &assessment);
        self.db.insert_message(&message, &records).await?;
        self.moderation.announce_detection(&message, &assessment, &records);

        let origin = if message.is_forwarded { "forward" } else { "direct" };
        MESSAGES_SENT_TOTAL
            .with_label_values(&[message.message_type.as_str(), origin])
            .inc();
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            %sender_id,
            crisis = message.crisis_detected,
            "Message committed"
        );

        let message = self.load_message(&message.id).await?;
        self.fanout
            .to_conversation(
                conversation,
                DeliveryEvent::NewMessage {
                    message: Box::new(message.clone()),
                    conversation_id: conversation.id.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// Copy a message into every target conversation the actor belongs to
    ///
    /// Targets the actor is not an active member of are skipped, not failed.
    pub async fn forward(
        &self,
        message_id: &str,
        actor_id: &str,
        target_ids: &[String],
    ) -> Result<Vec<Message>, AppError> {
        let (source, _) = self.load_for_participant(message_id, actor_id).await?;
        if source.is_deleted {
            return Err(AppError::validation("Deleted messages cannot be forwarded"));
        }
        if source.message_type == MessageType::System {
            return Err(AppError::validation("System messages cannot be forwarded"));
        }
        if target_ids.is_empty() {
            return Err(AppError::validation("At least one target conversation is required"));
        }

        let mut forwarded = Vec::new();
        for target_id in target_ids {
            let Some(target) = self
                .db
                .get_conversation(target_id)
                .await?
                .filter(|c| !c.is_deleted)
            else {
                tracing::debug!(%target_id, "Skipping missing forward target");
                continue;
            };
            if target.active_participant(actor_id).is_none()
                || self.blocked_in(&target, actor_id).await?
            {
                tracing::debug!(%target_id, %actor_id, "Skipping forward target without membership");
                continue;
            }

            let copy = self
                .commit(
                    &target,
                    actor_id,
                    source.content.clone(),
                    source.message_type,
                    source.media.0.clone(),
                    None,
                    Some(source.id.clone()),
                )
                .await?;
            forwarded.push(copy);
        }

        tracing::info!(%message_id, %actor_id, targets = forwarded.len(), "Message forwarded");
        Ok(forwarded)
    }

    // =========================================================================
    // Edit and delete
    // =========================================================================

    pub async fn edit(
        &self,
        message_id: &str,
        actor_id: &str,
        new_content: String,
    ) -> Result<Message, AppError> {
        let message = self.load_message(message_id).await?;
        if message.sender_id != actor_id {
            return Err(AppError::forbidden("Only the sender can edit this message"));
        }
        let conversation = self.load_conversation(&message.conversation_id).await?;
        require_active(&conversation, actor_id)?;
        if message.is_deleted {
            return Err(AppError::conflict("Deleted messages cannot be edited"));
        }

        let now = Utc::now();
        if !within_window(message.created_at, now, self.config.edit_window_seconds) {
            return Err(AppError::Expired(format!(
                "Messages can only be edited within {} minutes",
                self.config.edit_window_seconds / 60
            )));
        }
        if new_content.trim().is_empty() {
            return Err(AppError::validation("Message content cannot be empty"));
        }
        self.validate_content(&new_content)?;

        let assessment = self.classifier.assess(Some(&new_content));
        let records = ModerationService::detection_records(&message, &assessment);
        let updated = self
            .db
            .update_message_content(
                message_id,
                message.version,
                &new_content,
                &assessment.columns(),
                &records,
                now,
            )
            .await?;
        if !updated {
            return Err(AppError::conflict(
                "The message changed while you were editing it",
            ));
        }

        let message = self.load_message(message_id).await?;
        self.moderation.announce_detection(&message, &assessment, &records);
        self.db.touch_conversation(&conversation.id, now).await?;
        MESSAGE_MUTATIONS_TOTAL.with_label_values(&["edit"]).inc();

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::MessageEdited {
                    message_id: message_id.to_string(),
                    new_content,
                    edited_at: now,
                },
            )
            .await;

        Ok(message)
    }

    /// Delete for everyone (sender, inside the window) or for self
    pub async fn delete(
        &self,
        message_id: &str,
        actor_id: &str,
        for_everyone: bool,
    ) -> Result<(), AppError> {
        let message = self.load_message(message_id).await?;

        if !for_everyone {
            let conversation = self
                .db
                .get_conversation(&message.conversation_id)
                .await?
                .ok_or(AppError::NotFound)?;
            if conversation.participant(actor_id).is_none() {
                return Err(AppError::forbidden(
                    "You are not a participant in this conversation",
                ));
            }
            self.db
                .hide_message_for(message_id, actor_id, Utc::now())
                .await?;
            MESSAGE_MUTATIONS_TOTAL
                .with_label_values(&["delete_for_self"])
                .inc();
            return Ok(());
        }

        if message.sender_id != actor_id {
            return Err(AppError::forbidden(
                "Only the sender can delete this message for everyone",
            ));
        }
        let conversation = self.load_conversation(&message.conversation_id).await?;
        require_active(&conversation, actor_id)?;
        if message.is_deleted {
            return Err(AppError::conflict("Message has already been deleted"));
        }

        let now = Utc::now();
        if !within_window(message.created_at, now, self.config.delete_window_seconds) {
            return Err(AppError::Expired(format!(
                "Messages can only be deleted for everyone within {} minutes",
                self.config.delete_window_seconds / 60
            )));
        }

        if !self
            .db
            .mark_message_deleted(message_id, actor_id, &self.config.tombstone_text, now)
            .await?
        {
            return Err(AppError::conflict("Message has already been deleted"));
        }
        self.db.touch_conversation(&conversation.id, now).await?;
        MESSAGE_MUTATIONS_TOTAL
            .with_label_values(&["delete_for_everyone"])
            .inc();
        tracing::info!(%message_id, deleted_by = %actor_id, "Message deleted for everyone");

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::MessageDeleted {
                    message_id: message_id.to_string(),
                    deleted_by: actor_id.to_string(),
                    delete_for_everyone: true,
                },
            )
            .await;

        Ok(())
    }

    // =========================================================================
    // Reactions and read receipts
    // =========================================================================

    /// Set the user's single reaction, replacing any previous one
    pub async fn react(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(), AppError> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(AppError::validation("Invalid emoji"));
        }
        let (message, conversation) = self.load_for_participant(message_id, user_id).await?;
        if message.is_deleted {
            return Err(AppError::validation("Cannot react to a deleted message"));
        }

        if !self
            .db
            .upsert_reaction(message_id, user_id, emoji, Utc::now())
            .await?
        {
            return Err(AppError::conflict("You already reacted with this emoji"));
        }
        MESSAGE_MUTATIONS_TOTAL.with_label_values(&["react"]).inc();

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::MessageReaction {
                    message_id: message_id.to_string(),
                    user_id: user_id.to_string(),
                    emoji: emoji.to_string(),
                    action: ReactionAction::Add,
                },
            )
            .await;

        Ok(())
    }

    pub async fn unreact(&self, message_id: &str, user_id: &str) -> Result<(), AppError> {
        let (_, conversation) = self.load_for_participant(message_id, user_id).await?;

        let emoji = self
            .db
            .delete_reaction(message_id, user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        MESSAGE_MUTATIONS_TOTAL.with_label_values(&["unreact"]).inc();

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::MessageReaction {
                    message_id: message_id.to_string(),
                    user_id: user_id.to_string(),
                    emoji,
                    action: ReactionAction::Remove,
                },
            )
            .await;

        Ok(())
    }

    pub async fn list_reactions(
        &self,
        message_id: &str,
        requester_id: &str,
    ) -> Result<Vec<ReactionCount>, AppError> {
        self.load_for_participant(message_id, requester_id).await?;
        self.db.count_reactions(message_id, requester_id).await
    }

    /// Idempotent read receipt
    ///
    /// # Returns
    /// `true` if this call recorded the receipt.
    pub async fn mark_read(&self, message_id: &str, user_id: &str) -> Result<bool, AppError> {
        let (_, conversation) = self.load_for_participant(message_id, user_id).await?;

        let read_at = Utc::now();
        let recorded = self.db.insert_read(message_id, user_id, read_at).await?;
        if recorded {
            self.fanout
                .to_conversation(
                    &conversation,
                    DeliveryEvent::MessageRead {
                        message_id: message_id.to_string(),
                        read_by: user_id.to_string(),
                        read_at,
                    },
                )
                .await;
        }

        Ok(recorded)
    }

    // =========================================================================
    // Pinning
    // =========================================================================

    pub async fn set_pinned(
        &self,
        message_id: &str,
        actor_id: &str,
        pinned: bool,
    ) -> Result<(), AppError> {
        let (message, conversation) = self.load_for_participant(message_id, actor_id).await?;
        if self.config.pin_policy == PinPolicy::AdminsOnly
            && !require_active(&conversation, actor_id)?.is_admin()
        {
            return Err(AppError::forbidden(
                "Only conversation admins can pin messages",
            ));
        }
        if pinned && message.is_deleted {
            return Err(AppError::validation("Deleted messages cannot be pinned"));
        }

        if !self
            .db
            .set_message_pinned(message_id, pinned, actor_id, Utc::now())
            .await?
        {
            return Err(AppError::conflict(if pinned {
                "Message is already pinned"
            } else {
                "Message is not pinned"
            }));
        }
        MESSAGE_MUTATIONS_TOTAL
            .with_label_values(&[if pinned { "pin" } else { "unpin" }])
            .inc();

        let message_id = message_id.to_string();
        let by = actor_id.to_string();
        let event = if pinned {
            DeliveryEvent::MessagePinned { message_id, by }
        } else {
            DeliveryEvent::MessageUnpinned { message_id, by }
        };
        self.fanout.to_conversation(&conversation, event).await;

        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Page of messages in chronological order
    pub async fn list(
        &self,
        conversation_id: &str,
        requester_id: &str,
        before: Option<&str>,
        page: PageRequest,
    ) -> Result<Vec<Message>, AppError> {
        let conversation = self.load_conversation(conversation_id).await?;
        require_active(&conversation, requester_id)?;

        if let Some(before) = before {
            let in_conversation = self
                .db
                .get_message(before)
                .await?
                .is_some_and(|m| m.conversation_id == conversation_id);
            if !in_conversation {
                return Err(AppError::validation(
                    "before must reference a message in this conversation",
                ));
            }
        }

        let (limit, offset) = page.bounds();
        let mut messages = self
            .db
            .list_messages(conversation_id, requester_id, before, limit, offset)
            .await?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn get(&self, message_id: &str, requester_id: &str) -> Result<Message, AppError> {
        let (message, _) = self.load_for_participant(message_id, requester_id).await?;
        Ok(message)
    }

    pub async fn list_pinned(
        &self,
        conversation_id: &str,
        requester_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let conversation = self.load_conversation(conversation_id).await?;
        require_active(&conversation, requester_id)?;
        self.db
            .list_pinned_messages(conversation_id, requester_id)
            .await
    }

    /// Substring search across the user's conversations; the query is
    /// recorded in search history
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        filter: SearchFilter,
        page: PageRequest,
    ) -> Result<Vec<Message>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::validation("Search query cannot be empty"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::Validation(format!(
                "Search query must be at most {} characters",
                MAX_QUERY_CHARS
            )));
        }
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && from > to
        {
            return Err(AppError::validation("from must not be after to"));
        }

        let (limit, _) = page.bounds();
        let results = self
            .db
            .search_messages(user_id, query, &filter, limit)
            .await?;
        self.db
            .insert_search_history(user_id, query, Utc::now())
            .await?;

        Ok(results)
    }

    pub async fn search_history(&self, user_id: &str) -> Result<Vec<SearchHistoryEntry>, AppError> {
        self.db.list_search_history(user_id).await
    }

    pub async fn clear_search_history(&self, user_id: &str) -> Result<u64, AppError> {
        self.db.clear_search_history(user_id).await
    }
}
