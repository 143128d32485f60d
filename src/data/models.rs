//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps; JSON field names
//! are camelCase to match the real-time event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Closed vocabularies
// =============================================================================

/// Defines a closed string-backed enum stored as TEXT and exchanged as JSON
/// strings. `FromStr` rejects unknown values with `AppError::Validation`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            sqlx::Type,
        )]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                #[sqlx(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let normalized = value.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str() == normalized)
                    .ok_or_else(|| {
                        let expected: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        crate::error::AppError::Validation(format!(
                            "unknown {} '{}' (expected one of: {})",
                            stringify!($name),
                            value,
                            expected.join(", ")
                        ))
                    })
            }
        }
    };
}

string_enum! {
    /// Conversation kind
    pub enum ConversationKind {
        /// Exactly two participants
        Private => "private",
        /// N participants with name/description
        Group => "group",
    }
}

string_enum! {
    /// Role inside a conversation
    pub enum ParticipantRole {
        Admin => "admin",
        Member => "member",
    }
}

string_enum! {
    pub enum MessageType {
        Text => "text",
        Image => "image",
        Video => "video",
        Audio => "audio",
        File => "file",
        /// Generated by the server, never accepted from clients
        System => "system",
        Call => "call",
    }
}

string_enum! {
    /// Coarse ordinal classification of self-harm risk language
    pub enum CrisisSeverity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    /// Moderation state annotated on a message
    pub enum ModerationAction {
        None => "none",
        Warning => "warning",
        Hidden => "hidden",
        Deleted => "deleted",
        Escalated => "escalated",
    }
}

string_enum! {
    /// Action a moderator applies to a message
    pub enum ModerateAction {
        Approve => "approve",
        Warn => "warn",
        Hide => "hide",
        Delete => "delete",
        Escalate => "escalate",
    }
}

impl ModerateAction {
    /// Resulting message annotation
    pub fn annotation(&self) -> ModerationAction {
        match self {
            Self::Approve => ModerationAction::None,
            Self::Warn => ModerationAction::Warning,
            Self::Hide => ModerationAction::Hidden,
            Self::Delete => ModerationAction::Deleted,
            Self::Escalate => ModerationAction::Escalated,
        }
    }

    /// Status that open flags/reports on the message move to
    pub fn resolves_to(&self) -> ReviewStatus {
        match self {
            Self::Approve => ReviewStatus::Dismissed,
            Self::Escalate => ReviewStatus::Reviewed,
            Self::Warn | Self::Hide | Self::Delete => ReviewStatus::Actioned,
        }
    }

    /// Whether the sender's account accrues a warning
    pub fn records_warning(&self) -> bool {
        matches!(self, Self::Warn | Self::Delete)
    }
}

string_enum! {
    /// Review state shared by user reports and automatic flags
    ///
    /// `pending -> reviewed -> actioned | dismissed`; `pending` may also
    /// move straight to a terminal state.
    pub enum ReviewStatus {
        Pending => "pending",
        Reviewed => "reviewed",
        Actioned => "actioned",
        Dismissed => "dismissed",
    }
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Actioned | Self::Dismissed)
    }

    /// Parse a status filter; `open` is accepted as an alias of `pending`.
    pub fn parse_filter(value: &str) -> Result<Self, crate::error::AppError> {
        if value.trim().eq_ignore_ascii_case("open") {
            return Ok(Self::Pending);
        }
        value.parse()
    }
}

string_enum! {
    pub enum ReportTarget {
        Message => "message",
        User => "user",
    }
}

string_enum! {
    pub enum ReportReason {
        Spam => "spam",
        Harassment => "harassment",
        HateSpeech => "hate_speech",
        SelfHarm => "self_harm",
        InappropriateContent => "inappropriate_content",
        Impersonation => "impersonation",
        Other => "other",
    }
}

string_enum! {
    /// Outcome chosen when a moderator reviews a report
    pub enum ReportResolution {
        Dismiss => "dismiss",
        MarkReviewed => "mark_reviewed",
        WarnUser => "warn_user",
        HideMessage => "hide_message",
        DeleteMessage => "delete_message",
        BanUser => "ban_user",
    }
}

impl ReportResolution {
    pub fn resulting_status(&self) -> ReviewStatus {
        match self {
            Self::Dismiss => ReviewStatus::Dismissed,
            Self::MarkReviewed => ReviewStatus::Reviewed,
            Self::WarnUser | Self::HideMessage | Self::DeleteMessage | Self::BanUser => {
                ReviewStatus::Actioned
            }
        }
    }
}

string_enum! {
    /// Which classifier raised an automatic moderation flag
    pub enum FlagSource {
        Crisis => "crisis",
        Policy => "policy",
    }
}

string_enum! {
    pub enum PolicyCategory {
        Harassment => "harassment",
        HateSpeech => "hate_speech",
        Profanity => "profanity",
    }
}

string_enum! {
    pub enum NotificationKind {
        NewMessage => "new_message",
        AddedToConversation => "added_to_conversation",
        RemovedFromConversation => "removed_from_conversation",
        ModerationWarning => "moderation_warning",
        CrisisEscalation => "crisis_escalation",
        ReportResolved => "report_resolved",
    }
}

string_enum! {
    /// Platform-wide account role
    pub enum AccountRole {
        User => "user",
        Moderator => "moderator",
        Admin => "admin",
    }
}

impl AccountRole {
    pub fn can_moderate(&self) -> bool {
        matches!(self, Self::Moderator | Self::Admin)
    }
}

// =============================================================================
// Accounts (external collaborator view)
// =============================================================================

/// Resolved account, as seen by the messaging core
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub display_name: String,
    pub is_active: bool,
    pub role: AccountRole,
}

/// Warning recorded against an account by moderation
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccountWarning {
    pub id: String,
    pub user_id: String,
    pub moderator_id: String,
    pub reason: String,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Conversations
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_by: String,
    /// Current owner; starts as the creator, changes only by transfer
    pub owner_id: String,
    #[serde(skip)]
    pub private_key: Option<String>,
    pub last_message_id: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Ordered by join time; loaded separately
    #[sqlx(skip)]
    pub participants: Vec<Participant>,
}

impl Conversation {
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn active_participant(&self, user_id: &str) -> Option<&Participant> {
        self.participant(user_id).filter(|p| p.is_active())
    }

    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active())
    }

    pub fn active_user_ids(&self) -> Vec<String> {
        self.active_participants()
            .map(|p| p.user_id.clone())
            .collect()
    }
}

/// Canonical key for a private conversation between two users
///
/// Order-independent: `private_pair_key(a, b) == private_pair_key(b, a)`.
pub fn private_pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(skip)]
    pub conversation_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub last_read_message_id: Option<String>,
}

impl Participant {
    /// A participant whose `left_at` is unset
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }

    pub fn is_admin(&self) -> bool {
        self.role == ParticipantRole::Admin
    }

    /// Whether mute is in effect at `now` (a lapsed `muted_until` unmutes)
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.is_muted && self.muted_until.is_none_or(|until| until > now)
    }
}

/// Self-service participant settings; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStateUpdate {
    pub mute: Option<bool>,
    pub muted_until: Option<DateTime<Utc>>,
    pub archive: Option<bool>,
    pub last_read_message_id: Option<String>,
}

/// Conversation summary for list views
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: i64,
}

// =============================================================================
// Messages
// =============================================================================

/// External media reference; bytes live in the media service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub media: Json<Vec<MediaRef>>,
    pub reply_to: Option<String>,
    #[sqlx(skip)]
    pub reactions: Vec<Reaction>,
    #[sqlx(skip)]
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    /// Hidden by a moderator; visible to the sender only
    pub is_hidden: bool,
    pub is_pinned: bool,
    pub pinned_by: Option<String>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub is_forwarded: bool,
    pub forwarded_from: Option<String>,
    pub crisis_detected: bool,
    pub crisis_keywords: Json<Vec<String>>,
    pub crisis_severity: Option<CrisisSeverity>,
    pub policy_flags: Json<Vec<String>>,
    pub moderation_action: ModerationAction,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
    /// Bumped on every content mutation; used for compare-and-set edits
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    pub fn reaction_of(&self, user_id: &str) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.user_id == user_id)
    }
}

/// Per-emoji reaction tally
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCount {
    pub emoji: String,
    pub count: i64,
    pub user_reacted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryEntry {
    pub id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Moderation
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub reporter_id: String,
    pub target_kind: ReportTarget,
    /// Message id or user id, depending on `target_kind`
    pub target_id: String,
    pub reason: ReportReason,
    pub description: String,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub resolution: Option<ReportResolution>,
    pub created_at: DateTime<Utc>,
}

/// Automatic moderation queue entry raised by a classifier
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ModerationFlag {
    pub id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub source: FlagSource,
    pub severity: Option<CrisisSeverity>,
    pub matched_terms: Json<Vec<String>>,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Audit trail entry for a moderator action
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ModerationDecision {
    pub id: String,
    pub message_id: String,
    pub moderator_id: String,
    pub action: ModerateAction,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Auditable record of a critical crisis detection
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub severity: CrisisSeverity,
    pub keywords: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Notifications
// =============================================================================

/// Durable notification, capped per recipient
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Json<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_pair_key_is_order_independent() {
        assert_eq!(private_pair_key("alice", "bob"), private_pair_key("bob", "alice"));
        assert_eq!(private_pair_key("alice", "bob"), "alice:bob");
    }

    #[test]
    fn string_enums_parse_case_insensitively() {
        assert_eq!("Group".parse::<ConversationKind>().unwrap(), ConversationKind::Group);
        assert_eq!("hate_speech".parse::<ReportReason>().unwrap(), ReportReason::HateSpeech);
        assert!("bogus".parse::<MessageType>().is_err());
    }

    #[test]
    fn open_is_alias_for_pending() {
        assert_eq!(ReviewStatus::parse_filter("open").unwrap(), ReviewStatus::Pending);
        assert!(!ReviewStatus::Reviewed.is_terminal());
        assert!(ReviewStatus::Dismissed.is_terminal());
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(CrisisSeverity::Critical > CrisisSeverity::High);
        assert!(CrisisSeverity::Medium > CrisisSeverity::Low);
    }

    #[test]
    fn lapsed_mute_is_not_in_effect() {
        let now = Utc::now();
        let participant = Participant {
            conversation_id: "c".into(),
            user_id: "u".into(),
            role: ParticipantRole::Member,
            joined_at: now,
            left_at: None,
            is_muted: true,
            muted_until: Some(now - chrono::Duration::minutes(1)),
            is_archived: false,
            last_read_message_id: None,
        };
        assert!(!participant.is_muted_at(now));
    }
}
