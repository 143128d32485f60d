//! Conversation service
//!
//! Owns conversation identity, the participant roster and per-participant
//! settings. Every mutation re-reads the conversation, checks the actor's
//! standing against that snapshot and then applies a field-scoped update.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{AccountDirectory, NotificationService, PageRequest};
use crate::data::{
    Conversation, ConversationFilter, ConversationKind, ConversationSummary, Database, EntityId,
    NotificationKind, Participant, ParticipantRole, ParticipantStateUpdate, private_pair_key,
};
use crate::delivery::{DeliveryEvent, Fanout};
use crate::error::AppError;

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 500;

/// Input for `ConversationService::create`
#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub participant_ids: Vec<String>,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
}

fn validate_text(field: &str, value: Option<&str>, max_chars: usize) -> Result<(), AppError> {
    if let Some(value) = value
        && value.chars().count() > max_chars
    {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, max_chars
        )));
    }
    Ok(())
}

/// Active participant record for `user_id`, or `Forbidden`
pub(crate) fn require_active<'a>(
    conversation: &'a Conversation,
    user_id: &str,
) -> Result<&'a Participant, AppError> {
    conversation
        .active_participant(user_id)
        .ok_or_else(|| AppError::forbidden("You are not a participant in this conversation"))
}

fn require_admin<'a>(
    conversation: &'a Conversation,
    user_id: &str,
) -> Result<&'a Participant, AppError> {
    let participant = require_active(conversation, user_id)?;
    if !participant.is_admin() {
        return Err(AppError::forbidden(
            "Only conversation admins can perform this action",
        ));
    }
    Ok(participant)
}

fn require_group(conversation: &Conversation) -> Result<(), AppError> {
    if conversation.kind != ConversationKind::Group {
        return Err(AppError::validation(
            "This operation is only available for group conversations",
        ));
    }
    Ok(())
}

/// Conversation service
#[derive(Clone)]
pub struct ConversationService {
    db: Arc<Database>,
    accounts: Arc<dyn AccountDirectory>,
    fanout: Fanout,
    notifications: NotificationService,
}

impl ConversationService {
    pub fn new(
        db: Arc<Database>,
        accounts: Arc<dyn AccountDirectory>,
        fanout: Fanout,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db,
            accounts,
            fanout,
            notifications,
        }
    }

    /// Load a conversation that has not been soft-deleted
    pub(crate) async fn load(&self, id: &str) -> Result<Conversation, AppError> {
        self.db
            .get_conversation(id)
            .await?
            .filter(|c| !c.is_deleted)
            .ok_or(AppError::NotFound)
    }

    async fn require_account(&self, user_id: &str) -> Result<(), AppError> {
        match self.accounts.resolve_user(user_id).await? {
            Some(user) if user.is_active => Ok(()),
            Some(_) => Err(AppError::forbidden(format!("Account {} is not active", user_id))),
            None => Err(AppError::NotFound),
        }
    }

    // =========================================================================
    // Creation and lookup
    // =========================================================================

    /// Create a conversation
    ///
    /// A private conversation between a pair that already has one returns
    /// the existing conversation unchanged (`created == false`); if the
    /// caller had left it, they re-enter as active.
    pub async fn create(
        &self,
        creator_id: &str,
        input: CreateConversation,
    ) -> Result<(Conversation, bool), AppError> {
        self.require_account(creator_id).await?;

        let others: BTreeSet<String> = input
            .participant_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && id != creator_id)
            .collect();
        for user_id in &others {
            self.require_account(user_id).await?;
        }

        match input.kind {
            ConversationKind::Private => {
                let mut others = others.into_iter();
                let (Some(other), None) = (others.next(), others.next()) else {
                    return Err(AppError::validation(
                        "A private conversation needs exactly one other participant",
                    ));
                };
                self.create_private(creator_id, &other).await
            }
            ConversationKind::Group => {
                let conversation = self.create_group(creator_id, others, input).await?;
                Ok((conversation, true))
            }
        }
    }

    async fn create_private(
        &self,
        creator_id: &str,
        other_id: &str,
    ) -> Result<(Conversation, bool), AppError> {
        if self.accounts.is_blocked(other_id, creator_id).await?
            || self.accounts.is_blocked(creator_id, other_id).await?
        {
            return Err(AppError::forbidden(
                "Cannot start a conversation with this user",
            ));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: EntityId::new().0,
            kind: ConversationKind::Private,
            name: None,
            description: None,
            created_by: creator_id.to_string(),
            owner_id: creator_id.to_string(),
            private_key: Some(private_pair_key(creator_id, other_id)),
            last_message_id: None,
            last_activity: now,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            participants: Vec::new(),
        };
        let roster = [creator_id, other_id].map(|user_id| Participant {
            conversation_id: conversation.id.clone(),
            user_id: user_id.to_string(),
            role: ParticipantRole::Member,
            joined_at: now,
            left_at: None,
            is_muted: false,
            muted_until: None,
            is_archived: false,
            last_read_message_id: None,
        });

        let (id, created) = self
            .db
            .insert_private_conversation(&conversation, &roster)
            .await?;

        if !created {
            let existing = self.load(&id).await?;
            if existing.active_participant(creator_id).is_none() {
                self.db
                    .activate_participant(&id, creator_id, ParticipantRole::Member, now)
                    .await?;
                tracing::info!(conversation_id = %id, user_id = %creator_id, "Participant rejoined private conversation");
                return Ok((self.load(&id).await?, false));
            }
            return Ok((existing, false));
        }

        let conversation = self.load(&id).await?;
        tracing::info!(conversation_id = %id, "Private conversation created");
        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ConversationCreated {
                    conversation: Box::new(conversation.clone()),
                },
            )
            .await;

        Ok((conversation, true))
    }

    async fn create_group(
        &self,
        creator_id: &str,
        members: BTreeSet<String>,
        input: CreateConversation,
    ) -> Result<Conversation, AppError> {
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::validation("Group conversations require a name"))?
            .to_string();
        validate_text("name", Some(&name), MAX_NAME_CHARS)?;
        validate_text("description", input.description.as_deref(), MAX_DESCRIPTION_CHARS)?;

        let now = Utc::now();
        let id = EntityId::new().0;
        let conversation = Conversation {
            id: id.clone(),
            kind: ConversationKind::Group,
            name: Some(name),
            description: input.description,
            created_by: creator_id.to_string(),
            owner_id: creator_id.to_string(),
            private_key: None,
            last_message_id: None,
            last_activity: now,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            participants: Vec::new(),
        };

        let mut roster = Vec::with_capacity(members.len() + 1);
        for (user_id, role) in std::iter::once((creator_id.to_string(), ParticipantRole::Admin))
            .chain(members.into_iter().map(|m| (m, ParticipantRole::Member)))
        {
            roster.push(Participant {
                conversation_id: id.clone(),
                user_id,
                role,
                joined_at: now,
                left_at: None,
                is_muted: false,
                muted_until: None,
                is_archived: false,
                last_read_message_id: None,
            });
        }

        self.db.insert_group_conversation(&conversation, &roster).await?;
        let conversation = self.load(&id).await?;
        tracing::info!(conversation_id = %id, participants = roster.len(), "Group conversation created");

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ConversationCreated {
                    conversation: Box::new(conversation.clone()),
                },
            )
            .await;

        let added: Vec<String> = conversation
            .active_participants()
            .filter(|p| p.user_id != creator_id)
            .map(|p| p.user_id.clone())
            .collect();
        self.notifications
            .notify_many(
                &added,
                NotificationKind::AddedToConversation,
                format!(
                    "You were added to {}",
                    conversation.name.as_deref().unwrap_or("a conversation")
                ),
                json!({ "conversationId": conversation.id, "addedBy": creator_id }),
            )
            .await?;

        Ok(conversation)
    }

    /// Get a conversation the requester actively participates in
    pub async fn get(&self, id: &str, requester_id: &str) -> Result<Conversation, AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, requester_id)?;
        Ok(conversation)
    }

    /// Conversations the user is active in, most recent activity first,
    /// each with the user's unread count
    pub async fn list(
        &self,
        user_id: &str,
        filter: ConversationFilter,
        page: PageRequest,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let (limit, offset) = page.bounds();
        let conversations = self
            .db
            .list_conversations_for_user(user_id, &filter, limit, offset)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread_count = self.db.count_unread(&conversation.id, user_id).await?;
            summaries.push(ConversationSummary {
                conversation,
                unread_count,
            });
        }
        Ok(summaries)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    pub async fn add_participant(
        &self,
        id: &str,
        actor_id: &str,
        new_user_id: &str,
    ) -> Result<Conversation, AppError> {
        let conversation = self.load(id).await?;
        require_admin(&conversation, actor_id)?;
        require_group(&conversation)?;
        self.require_account(new_user_id).await?;

        let activated = self
            .db
            .activate_participant(id, new_user_id, ParticipantRole::Member, Utc::now())
            .await?;
        if !activated {
            return Err(AppError::conflict("User is already an active participant"));
        }

        let conversation = self.load(id).await?;
        tracing::info!(conversation_id = %id, user_id = %new_user_id, added_by = %actor_id, "Participant added");

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ParticipantAdded {
                    conversation_id: id.to_string(),
                    user_id: new_user_id.to_string(),
                    added_by: actor_id.to_string(),
                },
            )
            .await;
        self.fanout
            .to_user(
                new_user_id,
                DeliveryEvent::ConversationCreated {
                    conversation: Box::new(conversation.clone()),
                },
            )
            .await;
        self.notifications
            .notify_many(
                &[new_user_id.to_string()],
                NotificationKind::AddedToConversation,
                format!(
                    "You were added to {}",
                    conversation.name.as_deref().unwrap_or("a conversation")
                ),
                json!({ "conversationId": id, "addedBy": actor_id }),
            )
            .await?;

        Ok(conversation)
    }

    /// Remove another participant; the owner can never be removed
    pub async fn remove_participant(
        &self,
        id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        if actor_id == user_id {
            return self.leave(id, user_id).await;
        }

        let conversation = self.load(id).await?;
        require_admin(&conversation, actor_id)?;
        require_group(&conversation)?;
        if conversation.owner_id == user_id {
            return Err(AppError::forbidden(
                "The conversation owner cannot be removed",
            ));
        }
        if conversation.active_participant(user_id).is_none() {
            return Err(AppError::NotFound);
        }

        self.db.mark_participant_left(id, user_id, Utc::now()).await?;
        self.notifications.forget_viewer(id, user_id).await;
        tracing::info!(conversation_id = %id, %user_id, removed_by = %actor_id, "Participant removed");

        // The pre-removal snapshot still lists the removed user, and membership
        // events reach muted participants.
        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ParticipantRemoved {
                    conversation_id: id.to_string(),
                    user_id: user_id.to_string(),
                    removed_by: actor_id.to_string(),
                },
            )
            .await;
        self.fanout
            .to_user(
                user_id,
                DeliveryEvent::RemovedFromConversation {
                    conversation_id: id.to_string(),
                    removed_by: actor_id.to_string(),
                },
            )
            .await;
        self.notifications
            .notify_many(
                &[user_id.to_string()],
                NotificationKind::RemovedFromConversation,
                format!(
                    "You were removed from {}",
                    conversation.name.as_deref().unwrap_or("a conversation")
                ),
                json!({ "conversationId": id, "removedBy": actor_id }),
            )
            .await?;

        Ok(())
    }

    /// Leave a conversation; a group owner must transfer ownership first
    pub async fn leave(&self, id: &str, user_id: &str) -> Result<(), AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, user_id)?;

        if conversation.kind == ConversationKind::Group
            && conversation.owner_id == user_id
            && conversation.active_participants().count() > 1
        {
            return Err(AppError::conflict(
                "Transfer ownership before leaving this conversation",
            ));
        }

        self.db.mark_participant_left(id, user_id, Utc::now()).await?;
        self.notifications.forget_viewer(id, user_id).await;
        tracing::info!(conversation_id = %id, %user_id, "Participant left");

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ParticipantLeft {
                    conversation_id: id.to_string(),
                    user_id: user_id.to_string(),
                },
            )
            .await;

        Ok(())
    }

    /// Hand ownership to another active participant, who becomes an admin
    pub async fn transfer_ownership(
        &self,
        id: &str,
        actor_id: &str,
        new_owner_id: &str,
    ) -> Result<Conversation, AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, actor_id)?;
        require_group(&conversation)?;
        if conversation.owner_id != actor_id {
            return Err(AppError::forbidden(
                "Only the conversation owner can transfer ownership",
            ));
        }
        if new_owner_id == actor_id {
            return Err(AppError::validation("You already own this conversation"));
        }
        if conversation.active_participant(new_owner_id).is_none() {
            return Err(AppError::validation(
                "The new owner must be an active participant",
            ));
        }

        if !self
            .db
            .transfer_ownership(id, actor_id, new_owner_id)
            .await?
        {
            return Err(AppError::conflict("Ownership changed concurrently"));
        }

        let conversation = self.load(id).await?;
        tracing::info!(conversation_id = %id, previous_owner = %actor_id, new_owner = %new_owner_id, "Ownership transferred");

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::OwnershipTransferred {
                    conversation_id: id.to_string(),
                    previous_owner: actor_id.to_string(),
                    new_owner: new_owner_id.to_string(),
                },
            )
            .await;

        Ok(conversation)
    }

    pub async fn set_participant_role(
        &self,
        id: &str,
        actor_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> Result<Conversation, AppError> {
        let conversation = self.load(id).await?;
        require_admin(&conversation, actor_id)?;
        require_group(&conversation)?;
        if conversation.owner_id == user_id && role != ParticipantRole::Admin {
            return Err(AppError::forbidden("The conversation owner must remain an admin"));
        }
        if !self.db.set_participant_role(id, user_id, role).await? {
            return Err(AppError::NotFound);
        }

        let conversation = self.load(id).await?;
        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ConversationUpdated {
                    conversation: Box::new(conversation.clone()),
                },
            )
            .await;

        Ok(conversation)
    }

    // =========================================================================
    // Settings and metadata
    // =========================================================================

    /// Self-service mute/archive/last-read settings
    pub async fn update_participant_state(
        &self,
        id: &str,
        user_id: &str,
        update: ParticipantStateUpdate,
    ) -> Result<Participant, AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, user_id)?;

        if let Some(message_id) = &update.last_read_message_id {
            let belongs = self
                .db
                .get_message(message_id)
                .await?
                .is_some_and(|m| m.conversation_id == id);
            if !belongs {
                return Err(AppError::validation(
                    "lastReadMessageId must reference a message in this conversation",
                ));
            }
        }
        if update.mute == Some(true)
            && update.muted_until.is_some_and(|until| until <= Utc::now())
        {
            return Err(AppError::validation("mutedUntil must be in the future"));
        }

        self.db.update_participant_state(id, user_id, &update).await?;

        self.load(id)
            .await?
            .participant(user_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Update group name/description (admins only)
    pub async fn update_details(
        &self,
        id: &str,
        actor_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Conversation, AppError> {
        let conversation = self.load(id).await?;
        require_admin(&conversation, actor_id)?;
        require_group(&conversation)?;

        let name = name.map(|n| n.trim().to_string());
        if name.as_deref() == Some("") {
            return Err(AppError::validation("name cannot be empty"));
        }
        validate_text("name", name.as_deref(), MAX_NAME_CHARS)?;
        validate_text("description", description.as_deref(), MAX_DESCRIPTION_CHARS)?;

        self.db
            .update_conversation_details(id, name.as_deref(), description.as_deref())
            .await?;

        let conversation = self.load(id).await?;
        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ConversationUpdated {
                    conversation: Box::new(conversation.clone()),
                },
            )
            .await;

        Ok(conversation)
    }

    /// Soft delete (owner only); history is preserved
    pub async fn delete(&self, id: &str, actor_id: &str) -> Result<(), AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, actor_id)?;
        if conversation.owner_id != actor_id {
            return Err(AppError::forbidden(
                "Only the conversation owner can delete it",
            ));
        }

        if !self.db.soft_delete_conversation(id, Utc::now()).await? {
            return Err(AppError::NotFound);
        }
        tracing::info!(conversation_id = %id, deleted_by = %actor_id, "Conversation deleted");

        self.fanout
            .to_conversation(
                &conversation,
                DeliveryEvent::ConversationDeleted {
                    conversation_id: id.to_string(),
                    deleted_by: actor_id.to_string(),
                },
            )
            .await;

        Ok(())
    }

    // =========================================================================
    // Read state and presence
    // =========================================================================

    /// Mark every message read and move the last-read pointer
    pub async fn mark_read(&self, id: &str, user_id: &str) -> Result<u64, AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, user_id)?;

        let read_at = Utc::now();
        let (marked, last_read) = self.db.mark_conversation_read(id, user_id, read_at).await?;

        if marked > 0 {
            self.fanout
                .to_conversation(
                    &conversation,
                    DeliveryEvent::ConversationRead {
                        conversation_id: id.to_string(),
                        user_id: user_id.to_string(),
                        last_read_message_id: last_read,
                        read_at,
                    },
                )
                .await;
        }

        Ok(marked)
    }

    /// Viewing heartbeat; suppresses new-message notifications for the TTL
    pub async fn touch_viewing(&self, id: &str, user_id: &str) -> Result<(), AppError> {
        let conversation = self.load(id).await?;
        require_active(&conversation, user_id)?;
        self.notifications.touch_viewer(id, user_id).await;
        Ok(())
    }
}
