//! SQLite database operations
//!
//! All database access goes through this module.
//! Shared collections (participants, reactions, read receipts, hides) live in
//! their own tables and are mutated with field-scoped atomic statements, so
//! concurrent writers never round-trip a whole document.

use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Search history entries kept per user
pub const SEARCH_HISTORY_LIMIT: i64 = 20;

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Filters for the conversation list
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub kind: Option<ConversationKind>,
    pub archived: Option<bool>,
}

/// Filters for message search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub conversation_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Classifier verdict columns written alongside message content
#[derive(Debug, Clone, Default)]
pub struct SafetyColumns {
    pub crisis_detected: bool,
    pub crisis_keywords: Vec<String>,
    pub crisis_severity: Option<CrisisSeverity>,
    pub policy_flags: Vec<String>,
}

/// Moderation records that must commit together with message content
#[derive(Debug, Clone, Default)]
pub struct SafetyRecords {
    pub alert: Option<EmergencyAlert>,
    pub flags: Vec<ModerationFlag>,
}

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::from(e)
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // =========================================================================
    // Accounts (collaborator backing store)
    // =========================================================================

    /// Provision an account row. Registration itself happens elsewhere.
    pub async fn insert_account(
        &self,
        id: &str,
        display_name: &str,
        role: AccountRole,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, display_name, role, is_active, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<UserSummary>, AppError> {
        let account = sqlx::query_as::<_, UserSummary>(
            "SELECT id, display_name, is_active, role FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn set_account_active(&self, id: &str, is_active: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn insert_block(&self, blocker_id: &str, blocked_id: &str) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR IGNORE INTO account_blocks (blocker_id, blocked_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn is_blocked(&self, blocker_id: &str, blocked_id: &str) -> Result<bool, AppError> {
        let blocked: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM account_blocks WHERE blocker_id = ? AND blocked_id = ?",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(blocked.is_some())
    }

    pub async fn insert_account_warning(&self, warning: &AccountWarning) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO account_warnings (id, user_id, moderator_id, reason, message_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&warning.id)
        .bind(&warning.user_id)
        .bind(&warning.moderator_id)
        .bind(&warning.reason)
        .bind(&warning.message_id)
        .bind(warning.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_account_warnings(
        &self,
        user_id: &str,
    ) -> Result<Vec<AccountWarning>, AppError> {
        let warnings = sqlx::query_as::<_, AccountWarning>(
            "SELECT * FROM account_warnings WHERE user_id = ? ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(warnings)
    }

    /// Deactivate an account and record who banned it
    pub async fn ban_account(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET is_active = 0, banned_at = ?, banned_by = ?, ban_reason = ?
            WHERE id = ? AND banned_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(moderator_id)
        .bind(reason)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_moderator_ids(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM accounts WHERE role IN ('moderator', 'admin') AND is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Insert a private conversation keyed by the sorted participant pair
    ///
    /// Returns the stored conversation id and whether it was newly created.
    /// A concurrent or repeated call for the same pair resolves to the
    /// existing row through the UNIQUE `private_key` column.
    pub async fn insert_private_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> Result<(String, bool), AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversations (
                id, kind, name, description, created_by, owner_id, private_key,
                last_message_id, last_activity, is_deleted, created_at
            ) VALUES (?, ?, NULL, NULL, ?, ?, ?, NULL, ?, 0, ?)
            ON CONFLICT(private_key) DO NOTHING
            "#,
        )
        .bind(&conversation.id)
        .bind(ConversationKind::Private)
        .bind(&conversation.created_by)
        .bind(&conversation.owner_id)
        .bind(&conversation.private_key)
        .bind(conversation.last_activity)
        .bind(conversation.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            let existing_id: String =
                sqlx::query_scalar("SELECT id FROM conversations WHERE private_key = ?")
                    .bind(&conversation.private_key)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.commit().await?;
            return Ok((existing_id, false));
        }

        for participant in participants {
            insert_participant_row(&mut tx, &conversation.id, participant).await?;
        }

        tx.commit().await?;
        Ok((conversation.id.clone(), true))
    }

    pub async fn insert_group_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (
                id, kind, name, description, created_by, owner_id, private_key,
                last_message_id, last_activity, is_deleted, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, ?, 0, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(ConversationKind::Group)
        .bind(&conversation.name)
        .bind(&conversation.description)
        .bind(&conversation.created_by)
        .bind(&conversation.owner_id)
        .bind(conversation.last_activity)
        .bind(conversation.created_at)
        .execute(&mut *tx)
        .await?;

        for participant in participants {
            insert_participant_row(&mut tx, &conversation.id, participant).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get a conversation (including soft-deleted ones) with its roster
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, AppError> {
        let conversation =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(mut conversation) = conversation else {
            return Ok(None);
        };
        conversation.participants = self.list_participants(id).await?;
        Ok(Some(conversation))
    }

    pub async fn list_participants(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Participant>, AppError> {
        let participants = sqlx::query_as::<_, Participant>(
            r#"
            SELECT * FROM conversation_participants
            WHERE conversation_id = ?
            ORDER BY joined_at ASC, user_id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    /// Conversations where the user is an active participant,
    /// most recent activity first
    pub async fn list_conversations_for_user(
        &self,
        user_id: &str,
        filter: &ConversationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT c.* FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.left_at IS NULL AND c.is_deleted = 0 AND p.user_id = "#,
        );
        query_builder.push_bind(user_id);

        if let Some(kind) = filter.kind {
            query_builder.push(" AND c.kind = ");
            query_builder.push_bind(kind);
        }
        if let Some(archived) = filter.archived {
            query_builder.push(" AND p.is_archived = ");
            query_builder.push_bind(archived);
        }

        query_builder.push(" ORDER BY c.last_activity DESC, c.id DESC LIMIT ");
        query_builder.push_bind(limit);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);

        let mut conversations = query_builder
            .build_query_as::<Conversation>()
            .fetch_all(&self.pool)
            .await?;

        if conversations.is_empty() {
            return Ok(conversations);
        }

        let mut participants_query = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM conversation_participants WHERE conversation_id IN (",
        );
        {
            let mut separated = participants_query.separated(", ");
            for conversation in &conversations {
                separated.push_bind(conversation.id.clone());
            }
        }
        participants_query.push(") ORDER BY joined_at ASC, user_id ASC");

        let participants = participants_query
            .build_query_as::<Participant>()
            .fetch_all(&self.pool)
            .await?;

        let mut by_conversation: HashMap<String, Vec<Participant>> = HashMap::new();
        for participant in participants {
            by_conversation
                .entry(participant.conversation_id.clone())
                .or_default()
                .push(participant);
        }
        for conversation in &mut conversations {
            conversation.participants = by_conversation.remove(&conversation.id).unwrap_or_default();
        }

        Ok(conversations)
    }

    /// Messages the user has not read, excluding their own and any the
    /// user cannot see
    pub async fn count_unread(&self, conversation_id: &str, user_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages m
            WHERE m.conversation_id = ?
              AND m.sender_id != ?
              AND m.is_deleted = 0
              AND m.is_hidden = 0
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?
              )
              AND NOT EXISTS (
                  SELECT 1 FROM message_hidden_for h WHERE h.message_id = m.id AND h.user_id = ?
              )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Add a participant, or re-activate one who left
    ///
    /// # Returns
    /// `false` if the user is already an active participant.
    pub async fn activate_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
        role: ParticipantRole,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                left_at = NULL,
                role = excluded.role,
                joined_at = excluded.joined_at
            WHERE conversation_participants.left_at IS NOT NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(role)
        .bind(joined_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a participant as left; history is preserved
    ///
    /// # Returns
    /// `false` if the user was not an active participant.
    pub async fn mark_participant_left(
        &self,
        conversation_id: &str,
        user_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_participants SET left_at = ?
            WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(left_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply self-service settings; unset fields are left untouched
    pub async fn update_participant_state(
        &self,
        conversation_id: &str,
        user_id: &str,
        update: &ParticipantStateUpdate,
    ) -> Result<bool, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new("UPDATE conversation_participants SET ");
        let mut any = false;
        {
            let mut separated = query_builder.separated(", ");
            if let Some(mute) = update.mute {
                separated.push("is_muted = ");
                separated.push_bind_unseparated(mute);
                // Unmuting clears any expiry; muting without one is indefinite.
                separated.push("muted_until = ");
                separated.push_bind_unseparated(if mute { update.muted_until } else { None });
                any = true;
            }
            if let Some(archive) = update.archive {
                separated.push("is_archived = ");
                separated.push_bind_unseparated(archive);
                any = true;
            }
            if let Some(last_read) = &update.last_read_message_id {
                separated.push("last_read_message_id = ");
                separated.push_bind_unseparated(last_read.clone());
                any = true;
            }
        }
        if !any {
            return Ok(true);
        }

        query_builder.push(" WHERE conversation_id = ");
        query_builder.push_bind(conversation_id);
        query_builder.push(" AND user_id = ");
        query_builder.push_bind(user_id);
        query_builder.push(" AND left_at IS NULL");

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_participant_role(
        &self,
        conversation_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_participants SET role = ?
            WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(role)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Update group metadata; each field is written independently
    pub async fn update_conversation_details(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET name = COALESCE(?, name), description = COALESCE(?, description)
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft delete; the private pair key is released so the pair can start over
    pub async fn soft_delete_conversation(
        &self,
        id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET is_deleted = 1, deleted_at = ?, private_key = NULL
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(deleted_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move ownership to an active participant, promoting them to admin
    pub async fn transfer_ownership(
        &self,
        id: &str,
        current_owner: &str,
        new_owner: &str,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE conversations SET owner_id = ? WHERE id = ? AND owner_id = ? AND is_deleted = 0",
        )
        .bind(new_owner)
        .bind(id)
        .bind(current_owner)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !moved {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE conversation_participants SET role = ?
            WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(ParticipantRole::Admin)
        .bind(id)
        .bind(new_owner)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Persist a message with its moderation records, mark it read by its
    /// sender and advance the conversation's activity pointer, atomically
    pub async fn insert_message(
        &self,
        message: &Message,
        records: &SafetyRecords,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, content, message_type, media, reply_to,
                is_forwarded, forwarded_from, crisis_detected, crisis_keywords,
                crisis_severity, policy_flags, moderation_action, version, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.message_type)
        .bind(&message.media)
        .bind(&message.reply_to)
        .bind(message.is_forwarded)
        .bind(&message.forwarded_from)
        .bind(message.crisis_detected)
        .bind(&message.crisis_keywords)
        .bind(message.crisis_severity)
        .bind(&message.policy_flags)
        .bind(message.moderation_action)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)")
            .bind(&message.id)
            .bind(&message.sender_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        // lastActivity only moves forward
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = CASE WHEN ? >= last_activity THEN ? ELSE last_message_id END,
                last_activity = MAX(last_activity, ?)
            WHERE id = ?
            "#,
        )
        .bind(message.created_at)
        .bind(&message.id)
        .bind(message.created_at)
        .bind(&message.conversation_id)
        .execute(&mut *tx)
        .await?;

        write_safety_records(&mut tx, records).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Advance `last_activity` for a message event that is not a new message
    pub async fn touch_conversation(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET last_activity = MAX(last_activity, ?) WHERE id = ?")
            .bind(at)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get a message with its reactions and read receipts
    pub async fn get_message(&self, id: &str) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(message) = message else {
            return Ok(None);
        };

        let mut messages = vec![message];
        self.attach_message_details(&mut messages).await?;
        Ok(messages.pop())
    }

    /// Page through a conversation as `viewer_id` sees it, newest first
    ///
    /// Excludes messages the viewer deleted for themselves and messages
    /// hidden by moderation (unless the viewer sent them).
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        before: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT m.* FROM messages m WHERE m.conversation_id = ",
        );
        query_builder.push_bind(conversation_id);
        push_visible_to(&mut query_builder, viewer_id);

        if let Some(before) = before {
            query_builder.push(
                " AND (m.created_at, m.id) < (SELECT created_at, id FROM messages WHERE id = ",
            );
            query_builder.push_bind(before);
            query_builder.push(")");
        }

        query_builder.push(" ORDER BY m.created_at DESC, m.id DESC LIMIT ");
        query_builder.push_bind(limit);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);

        let mut messages = query_builder
            .build_query_as::<Message>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_message_details(&mut messages).await?;

        Ok(messages)
    }

    pub async fn list_pinned_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT m.* FROM messages m WHERE m.is_pinned = 1 AND m.is_deleted = 0 AND m.conversation_id = ",
        );
        query_builder.push_bind(conversation_id);
        push_visible_to(&mut query_builder, viewer_id);
        query_builder.push(" ORDER BY m.pinned_at DESC");

        let mut messages = query_builder
            .build_query_as::<Message>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_message_details(&mut messages).await?;

        Ok(messages)
    }

    /// Case-insensitive substring search over conversations the user
    /// actively participates in
    pub async fn search_messages(
        &self,
        user_id: &str,
        query: &str,
        filter: &SearchFilter,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT m.* FROM messages m
            JOIN conversation_participants p
              ON p.conversation_id = m.conversation_id AND p.left_at IS NULL
            JOIN conversations c ON c.id = m.conversation_id AND c.is_deleted = 0
            WHERE m.is_deleted = 0 AND m.message_type != 'system' AND p.user_id = "#,
        );
        query_builder.push_bind(user_id);
        query_builder.push(" AND instr(lower(m.content), lower(");
        query_builder.push_bind(query);
        query_builder.push(")) > 0");
        push_visible_to(&mut query_builder, user_id);

        if let Some(conversation_id) = &filter.conversation_id {
            query_builder.push(" AND m.conversation_id = ");
            query_builder.push_bind(conversation_id);
        }
        if let Some(from) = filter.from {
            query_builder.push(" AND m.created_at >= ");
            query_builder.push_bind(from);
        }
        if let Some(to) = filter.to {
            query_builder.push(" AND m.created_at <= ");
            query_builder.push_bind(to);
        }

        query_builder.push(" ORDER BY m.created_at DESC, m.id DESC LIMIT ");
        query_builder.push_bind(limit);

        let mut messages = query_builder
            .build_query_as::<Message>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_message_details(&mut messages).await?;

        Ok(messages)
    }

    /// Load reactions and read receipts for a batch of messages
    async fn attach_message_details(&self, messages: &mut [Message]) -> Result<(), AppError> {
        if messages.is_empty() {
            return Ok(());
        }

        #[derive(sqlx::FromRow)]
        struct ReactionRow {
            message_id: String,
            #[sqlx(flatten)]
            reaction: Reaction,
        }

        #[derive(sqlx::FromRow)]
        struct ReadRow {
            message_id: String,
            #[sqlx(flatten)]
            receipt: ReadReceipt,
        }

        let mut reactions_query = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, user_id, emoji, reacted_at FROM message_reactions WHERE message_id IN (",
        );
        {
            let mut separated = reactions_query.separated(", ");
            for message in messages.iter() {
                separated.push_bind(message.id.clone());
            }
        }
        reactions_query.push(") ORDER BY reacted_at ASC");

        let mut reads_query = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, user_id, read_at FROM message_reads WHERE message_id IN (",
        );
        {
            let mut separated = reads_query.separated(", ");
            for message in messages.iter() {
                separated.push_bind(message.id.clone());
            }
        }
        reads_query.push(") ORDER BY read_at ASC");

        let reaction_rows = reactions_query
            .build_query_as::<ReactionRow>()
            .fetch_all(&self.pool)
            .await?;
        let read_rows = reads_query
            .build_query_as::<ReadRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            reactions.entry(row.message_id).or_default().push(row.reaction);
        }
        let mut reads: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
        for row in read_rows {
            reads.entry(row.message_id).or_default().push(row.receipt);
        }

        for message in messages.iter_mut() {
            message.reactions = reactions.remove(&message.id).unwrap_or_default();
            message.read_by = reads.remove(&message.id).unwrap_or_default();
        }

        Ok(())
    }

    /// Compare-and-set content update
    ///
    /// # Returns
    /// `false` if the message changed since `expected_version` was read;
    /// nothing is written in that case.
    pub async fn update_message_content(
        &self,
        id: &str,
        expected_version: i64,
        content: &str,
        safety: &SafetyColumns,
        records: &SafetyRecords,
        edited_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = ?, is_edited = 1, edited_at = ?,
                crisis_detected = ?, crisis_keywords = ?, crisis_severity = ?, policy_flags = ?,
                version = version + 1
            WHERE id = ? AND version = ? AND is_deleted = 0
            "#,
        )
        .bind(content)
        .bind(edited_at)
        .bind(safety.crisis_detected)
        .bind(sqlx::types::Json(&safety.crisis_keywords))
        .bind(safety.crisis_severity)
        .bind(sqlx::types::Json(&safety.policy_flags))
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        write_safety_records(&mut tx, records).await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Delete for everyone: content becomes the tombstone and media is dropped
    ///
    /// # Returns
    /// `false` if the message was already deleted.
    pub async fn mark_message_deleted(
        &self,
        id: &str,
        deleted_by: &str,
        tombstone: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_deleted = 1, deleted_at = ?, deleted_by = ?, content = ?, media = '[]',
                is_pinned = 0, pinned_by = NULL, pinned_at = NULL, version = version + 1
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(deleted_at)
        .bind(deleted_by)
        .bind(tombstone)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete for self only
    pub async fn hide_message_for(
        &self,
        message_id: &str,
        user_id: &str,
        hidden_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR IGNORE INTO message_hidden_for (message_id, user_id, hidden_at) VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(hidden_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn is_hidden_for(&self, message_id: &str, user_id: &str) -> Result<bool, AppError> {
        let hidden: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM message_hidden_for WHERE message_id = ? AND user_id = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(hidden.is_some())
    }

    /// Set the user's single reaction, replacing any previous emoji
    ///
    /// # Returns
    /// `false` if the user already reacted with the same emoji.
    pub async fn upsert_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        reacted_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(message_id, user_id) DO UPDATE SET
                emoji = excluded.emoji,
                reacted_at = excluded.reacted_at
            WHERE message_reactions.emoji != excluded.emoji
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(reacted_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove the user's reaction, returning the emoji that was removed
    pub async fn delete_reaction(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, AppError> {
        let emoji: Option<String> = sqlx::query_scalar(
            "DELETE FROM message_reactions WHERE message_id = ? AND user_id = ? RETURNING emoji",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(emoji)
    }

    /// Per-emoji tallies, most used first
    pub async fn count_reactions(
        &self,
        message_id: &str,
        viewer_id: &str,
    ) -> Result<Vec<ReactionCount>, AppError> {
        let rows: Vec<(String, i64, bool)> = sqlx::query_as(
            r#"
            SELECT emoji, COUNT(*) AS count, MAX(user_id = ?) AS user_reacted
            FROM message_reactions
            WHERE message_id = ?
            GROUP BY emoji
            ORDER BY count DESC, emoji ASC
            "#,
        )
        .bind(viewer_id)
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(emoji, count, user_reacted)| ReactionCount {
                emoji,
                count,
                user_reacted,
            })
            .collect())
    }

    /// Record a read receipt
    ///
    /// # Returns
    /// `false` if the user had already read the message.
    pub async fn insert_read(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark every message in the conversation read for the user and move
    /// their last-read pointer to the newest message
    ///
    /// # Returns
    /// The number of newly read messages and the new last-read pointer.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<(u64, Option<String>), AppError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
            SELECT id, ?, ? FROM messages
            WHERE conversation_id = ? AND sender_id != ? AND is_deleted = 0
            "#,
        )
        .bind(user_id)
        .bind(read_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let latest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM messages WHERE conversation_id = ?
            ORDER BY created_at DESC, id DESC LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(latest) = &latest {
            sqlx::query(
                r#"
                UPDATE conversation_participants SET last_read_message_id = ?
                WHERE conversation_id = ? AND user_id = ?
                "#,
            )
            .bind(latest)
            .bind(conversation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((marked, latest))
    }

    /// Pin or unpin
    ///
    /// # Returns
    /// `false` if the message was already in the requested state.
    pub async fn set_message_pinned(
        &self,
        id: &str,
        pinned: bool,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = if pinned {
            sqlx::query(
                r#"
                UPDATE messages SET is_pinned = 1, pinned_by = ?, pinned_at = ?
                WHERE id = ? AND is_pinned = 0 AND is_deleted = 0
                "#,
            )
            .bind(actor_id)
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE messages SET is_pinned = 0, pinned_by = NULL, pinned_at = NULL
                WHERE id = ? AND is_pinned = 1
                "#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected() > 0)
    }

    /// Apply a moderator annotation, hiding or deleting as the action requires
    pub async fn apply_moderation(
        &self,
        id: &str,
        action: ModerateAction,
        moderator_id: &str,
        tombstone: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let hide = matches!(action, ModerateAction::Hide);
        let delete = matches!(action, ModerateAction::Delete);

        sqlx::query(
            r#"
            UPDATE messages
            SET moderation_action = ?, moderated_by = ?, moderated_at = ?,
                is_hidden = CASE WHEN ? THEN 1 WHEN ? = 'none' THEN 0 ELSE is_hidden END,
                is_deleted = CASE WHEN ? THEN 1 ELSE is_deleted END,
                deleted_at = CASE WHEN ? AND is_deleted = 0 THEN ? ELSE deleted_at END,
                deleted_by = CASE WHEN ? AND is_deleted = 0 THEN ? ELSE deleted_by END,
                content = CASE WHEN ? THEN ? ELSE content END,
                media = CASE WHEN ? THEN '[]' ELSE media END,
                version = version + 1
            WHERE id = ?
            "#,
        )
        .bind(action.annotation())
        .bind(moderator_id)
        .bind(at)
        .bind(hide)
        .bind(action.annotation())
        .bind(delete)
        .bind(delete)
        .bind(at)
        .bind(delete)
        .bind(moderator_id)
        .bind(delete)
        .bind(tombstone)
        .bind(delete)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Moderation: flags, decisions, alerts
    // =========================================================================

    pub async fn list_flags(
        &self,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModerationFlag>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM moderation_flags");
        if let Some(status) = status {
            query_builder.push(" WHERE status = ");
            query_builder.push_bind(status);
        }
        query_builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query_builder.push_bind(limit);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);

        let flags = query_builder
            .build_query_as::<ModerationFlag>()
            .fetch_all(&self.pool)
            .await?;

        Ok(flags)
    }

    pub async fn list_flags_for_message(
        &self,
        message_id: &str,
    ) -> Result<Vec<ModerationFlag>, AppError> {
        let flags = sqlx::query_as::<_, ModerationFlag>(
            "SELECT * FROM moderation_flags WHERE message_id = ? ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(flags)
    }

    /// Move every unresolved flag on a message to `status`
    pub async fn resolve_flags_for_message(
        &self,
        message_id: &str,
        status: ReviewStatus,
        moderator_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_flags SET status = ?, reviewed_by = ?, reviewed_at = ?
            WHERE message_id = ? AND status IN ('pending', 'reviewed')
            "#,
        )
        .bind(status)
        .bind(moderator_id)
        .bind(at)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn insert_decision(&self, decision: &ModerationDecision) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_decisions (id, message_id, moderator_id, action, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&decision.id)
        .bind(&decision.message_id)
        .bind(&decision.moderator_id)
        .bind(decision.action)
        .bind(&decision.reason)
        .bind(decision.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_decisions(
        &self,
        message_id: &str,
    ) -> Result<Vec<ModerationDecision>, AppError> {
        let decisions = sqlx::query_as::<_, ModerationDecision>(
            "SELECT * FROM moderation_decisions WHERE message_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(decisions)
    }

    pub async fn list_emergency_alerts(
        &self,
        unacknowledged_only: bool,
        limit: i64,
    ) -> Result<Vec<EmergencyAlert>, AppError> {
        let sql = if unacknowledged_only {
            "SELECT * FROM emergency_alerts WHERE acknowledged_at IS NULL ORDER BY created_at DESC LIMIT ?"
        } else {
            "SELECT * FROM emergency_alerts ORDER BY created_at DESC LIMIT ?"
        };

        let alerts = sqlx::query_as::<_, EmergencyAlert>(sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(alerts)
    }

    pub async fn get_emergency_alert(&self, id: &str) -> Result<Option<EmergencyAlert>, AppError> {
        let alert = sqlx::query_as::<_, EmergencyAlert>("SELECT * FROM emergency_alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(alert)
    }

    /// # Returns
    /// `false` if the alert was already acknowledged.
    pub async fn acknowledge_emergency_alert(
        &self,
        id: &str,
        moderator_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE emergency_alerts SET acknowledged_by = ?, acknowledged_at = ?
            WHERE id = ? AND acknowledged_at IS NULL
            "#,
        )
        .bind(moderator_id)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Insert a pending report
    ///
    /// # Errors
    /// `Conflict` if the reporter already has an unresolved report on the
    /// same target (enforced by a partial unique index).
    pub async fn insert_report(&self, report: &Report) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reports (
                id, reporter_id, target_kind, target_id, reason, description, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.reporter_id)
        .bind(report.target_kind)
        .bind(&report.target_id)
        .bind(report.reason)
        .bind(&report.description)
        .bind(report.status)
        .bind(report.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(AppError::conflict(
                "You already have an unresolved report for this target",
            )),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<Report>, AppError> {
        let report = sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(report)
    }

    pub async fn list_reports(
        &self,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Report>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM reports");
        if let Some(status) = status {
            query_builder.push(" WHERE status = ");
            query_builder.push_bind(status);
        }
        query_builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query_builder.push_bind(limit);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);

        let reports = query_builder
            .build_query_as::<Report>()
            .fetch_all(&self.pool)
            .await?;

        Ok(reports)
    }

    /// Transition an unresolved report
    ///
    /// # Returns
    /// `false` if the report had already reached a terminal state.
    pub async fn review_report(
        &self,
        id: &str,
        status: ReviewStatus,
        resolution: ReportResolution,
        moderator_id: &str,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = ?, resolution = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?
            WHERE id = ? AND status IN ('pending', 'reviewed')
            "#,
        )
        .bind(status)
        .bind(resolution)
        .bind(moderator_id)
        .bind(at)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resolve every unresolved report targeting a message
    ///
    /// # Returns
    /// Reporter ids of the reports that were resolved.
    pub async fn resolve_reports_for_message(
        &self,
        message_id: &str,
        status: ReviewStatus,
        moderator_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<String>, AppError> {
        let reporters = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE reports SET status = ?, reviewed_by = ?, reviewed_at = ?
            WHERE target_kind = 'message' AND target_id = ? AND status IN ('pending', 'reviewed')
            RETURNING reporter_id
            "#,
        )
        .bind(status)
        .bind(moderator_id)
        .bind(at)
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reporters)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Insert a notification and evict the recipient's oldest beyond `cap`
    pub async fn insert_notification(
        &self,
        notification: &Notification,
        cap: i64,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, recipient_id, kind, title, message, data, is_read, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.recipient_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.data)
        .bind(notification.created_at)
        .execute(&mut *tx)
        .await?;

        let evicted = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE recipient_id = ? AND id NOT IN (
                SELECT id FROM notifications WHERE recipient_id = ?
                ORDER BY created_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(&notification.recipient_id)
        .bind(&notification.recipient_id)
        .bind(cap)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(evicted)
    }

    pub async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let mut query_builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM notifications WHERE recipient_id = ");
        query_builder.push_bind(recipient_id);
        if unread_only {
            query_builder.push(" AND is_read = 0");
        }
        query_builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query_builder.push_bind(limit);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);

        let notifications = query_builder
            .build_query_as::<Notification>()
            .fetch_all(&self.pool)
            .await?;

        Ok(notifications)
    }

    pub async fn count_unread_notifications(&self, recipient_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// # Returns
    /// `false` if no such notification belongs to the recipient.
    pub async fn mark_notification_read(
        &self,
        id: &str,
        recipient_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?)
            WHERE id = ? AND recipient_id = ?
            "#,
        )
        .bind(at)
        .bind(id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_notifications_read(
        &self,
        recipient_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(at)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_notification(&self, id: &str, recipient_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND recipient_id = ?")
            .bind(id)
            .bind(recipient_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Search history
    // =========================================================================

    /// Record a query, keeping only the most recent entries per user
    pub async fn insert_search_history(
        &self,
        user_id: &str,
        query: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Repeating a query moves it to the top instead of duplicating it
        sqlx::query("DELETE FROM search_history WHERE user_id = ? AND query = ?")
            .bind(user_id)
            .bind(query)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO search_history (id, user_id, query, created_at) VALUES (?, ?, ?, ?)")
            .bind(EntityId::new().0)
            .bind(user_id)
            .bind(query)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM search_history
            WHERE user_id = ? AND id NOT IN (
                SELECT id FROM search_history WHERE user_id = ?
                ORDER BY created_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(SEARCH_HISTORY_LIMIT)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_search_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<SearchHistoryEntry>, AppError> {
        let entries = sqlx::query_as::<_, SearchHistoryEntry>(
            r#"
            SELECT id, query, created_at FROM search_history
            WHERE user_id = ? ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn clear_search_history(&self, user_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM search_history WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

async fn insert_participant_row(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    conversation_id: &str,
    participant: &Participant,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(conversation_id)
    .bind(&participant.user_id)
    .bind(participant.role)
    .bind(participant.joined_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Restrict `m` to messages `viewer_id` may see
fn push_visible_to(query_builder: &mut QueryBuilder<'_, Sqlite>, viewer_id: &str) {
    query_builder.push(" AND (m.is_hidden = 0 OR m.sender_id = ");
    query_builder.push_bind(viewer_id.to_string());
    query_builder.push(
        ") AND NOT EXISTS (SELECT 1 FROM message_hidden_for h WHERE h.message_id = m.id AND h.user_id = ",
    );
    query_builder.push_bind(viewer_id.to_string());
    query_builder.push(")");
}

async fn write_safety_records(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    records: &SafetyRecords,
) -> Result<(), AppError> {
    if let Some(alert) = &records.alert {
        insert_emergency_alert(tx, alert).await?;
    }
    for flag in &records.flags {
        insert_flag(tx, flag).await?;
    }
    Ok(())
}

async fn insert_emergency_alert(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    alert: &EmergencyAlert,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO emergency_alerts (
            id, message_id, conversation_id, sender_id, severity, keywords, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&alert.id)
    .bind(&alert.message_id)
    .bind(&alert.conversation_id)
    .bind(&alert.sender_id)
    .bind(alert.severity)
    .bind(&alert.keywords)
    .bind(alert.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_flag(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    flag: &ModerationFlag,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO moderation_flags (
            id, message_id, conversation_id, sender_id, source, severity,
            matched_terms, status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&flag.id)
    .bind(&flag.message_id)
    .bind(&flag.conversation_id)
    .bind(&flag.sender_id)
    .bind(flag.source)
    .bind(flag.severity)
    .bind(&flag.matched_terms)
    .bind(flag.status)
    .bind(flag.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
