//! Account collaborator
//!
//! The messaging core never owns accounts; it consumes this narrow
//! directory interface. `DbAccountDirectory` backs it with the local
//! `accounts*` tables, which are provisioned by the account service.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::data::{AccountWarning, Database, EntityId, UserSummary};
use crate::error::AppError;

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserSummary>, AppError>;

    /// Whether `blocker` has blocked `blocked`
    async fn is_blocked(&self, blocker: &str, blocked: &str) -> Result<bool, AppError>;

    async fn record_warning(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        message_id: Option<&str>,
    ) -> Result<(), AppError>;

    /// # Returns
    /// `false` if the account was already banned.
    async fn ban_user(&self, user_id: &str, moderator_id: &str, reason: &str)
    -> Result<bool, AppError>;

    /// Active moderators and admins
    async fn list_moderators(&self) -> Result<Vec<String>, AppError>;
}

pub struct DbAccountDirectory {
    db: Arc<Database>,
}

impl DbAccountDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountDirectory for DbAccountDirectory {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserSummary>, AppError> {
        self.db.get_account(user_id).await
    }

    async fn is_blocked(&self, blocker: &str, blocked: &str) -> Result<bool, AppError> {
        self.db.is_blocked(blocker, blocked).await
    }

    async fn record_warning(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        message_id: Option<&str>,
    ) -> Result<(), AppError> {
        let warning = AccountWarning {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            moderator_id: moderator_id.to_string(),
            reason: reason.to_string(),
            message_id: message_id.map(String::from),
            created_at: Utc::now(),
        };
        self.db.insert_account_warning(&warning).await?;

        tracing::info!(%user_id, %moderator_id, "Account warning recorded");
        Ok(())
    }

    async fn ban_user(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
    ) -> Result<bool, AppError> {
        let banned = self.db.ban_account(user_id, moderator_id, reason).await?;
        if banned {
            tracing::info!(%user_id, %moderator_id, "Account banned");
        }
        Ok(banned)
    }

    async fn list_moderators(&self) -> Result<Vec<String>, AppError> {
        self.db.list_moderator_ids().await
    }
}
