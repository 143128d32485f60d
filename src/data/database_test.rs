//! Database tests

use super::*;
use crate::error::AppError;
use chrono::{Duration, Utc};
use sqlx::types::Json;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn participant(user_id: &str, role: ParticipantRole) -> Participant {
    Participant {
        conversation_id: String::new(),
        user_id: user_id.to_string(),
        role,
        joined_at: Utc::now(),
        left_at: None,
        is_muted: false,
        muted_until: None,
        is_archived: false,
        last_read_message_id: None,
    }
}

fn conversation(kind: ConversationKind, creator: &str, private_key: Option<String>) -> Conversation {
    let now = Utc::now();
    Conversation {
        id: EntityId::new().0,
        kind,
        name: None,
        description: None,
        created_by: creator.to_string(),
        owner_id: creator.to_string(),
        private_key,
        last_message_id: None,
        last_activity: now,
        is_deleted: false,
        deleted_at: None,
        created_at: now,
        participants: Vec::new(),
    }
}

fn message(conversation_id: &str, sender_id: &str, content: &str) -> Message {
    Message {
        id: EntityId::new().0,
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        message_type: MessageType::Text,
        media: Json(Vec::new()),
        reply_to: None,
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
        is_forwarded: false,
        forwarded_from: None,
        crisis_detected: false,
        crisis_keywords: Json(Vec::new()),
        crisis_severity: None,
        policy_flags: Json(Vec::new()),
        moderation_action: ModerationAction::None,
        moderated_by: None,
        moderated_at: None,
        version: 0,
        created_at: Utc::now(),
    }
}

async fn create_group(db: &Database, creator: &str, members: &[&str]) -> String {
    let group = conversation(ConversationKind::Group, creator, None);
    let mut roster = vec![participant(creator, ParticipantRole::Admin)];
    roster.extend(members.iter().map(|m| participant(m, ParticipantRole::Member)));
    db.insert_group_conversation(&group, &roster).await.unwrap();
    group.id
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_account_lookup_and_blocks() {
    let (db, _temp_dir) = create_test_db().await;

    db.insert_account("alice", "Alice", AccountRole::User).await.unwrap();
    db.insert_account("mod", "Moderator", AccountRole::Moderator).await.unwrap();

    let alice = db.get_account("alice").await.unwrap().unwrap();
    assert_eq!(alice.display_name, "Alice");
    assert!(alice.is_active);
    assert_eq!(alice.role, AccountRole::User);
    assert!(db.get_account("nobody").await.unwrap().is_none());

    db.insert_block("alice", "bob").await.unwrap();
    assert!(db.is_blocked("alice", "bob").await.unwrap());
    assert!(!db.is_blocked("bob", "alice").await.unwrap());

    assert_eq!(db.list_moderator_ids().await.unwrap(), vec!["mod".to_string()]);

    assert!(db.ban_account("alice", "mod", "spam").await.unwrap());
    assert!(!db.ban_account("alice", "mod", "spam").await.unwrap());
    assert!(!db.get_account("alice").await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_private_conversation_insert_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;
    let key = private_pair_key("alice", "bob");

    let first = conversation(ConversationKind::Private, "alice", Some(key.clone()));
    let roster = [
        participant("alice", ParticipantRole::Member),
        participant("bob", ParticipantRole::Member),
    ];
    let (first_id, created) = db.insert_private_conversation(&first, &roster).await.unwrap();
    assert!(created);

    let second = conversation(ConversationKind::Private, "bob", Some(key));
    let (second_id, created) = db.insert_private_conversation(&second, &roster).await.unwrap();
    assert!(!created);
    assert_eq!(first_id, second_id);

    let stored = db.get_conversation(&first_id).await.unwrap().unwrap();
    assert_eq!(stored.participants.len(), 2);
}

#[tokio::test]
async fn test_soft_delete_releases_private_key() {
    let (db, _temp_dir) = create_test_db().await;
    let key = private_pair_key("alice", "bob");
    let roster = [
        participant("alice", ParticipantRole::Member),
        participant("bob", ParticipantRole::Member),
    ];

    let first = conversation(ConversationKind::Private, "alice", Some(key.clone()));
    let (first_id, _) = db.insert_private_conversation(&first, &roster).await.unwrap();
    assert!(db.soft_delete_conversation(&first_id, Utc::now()).await.unwrap());
    assert!(!db.soft_delete_conversation(&first_id, Utc::now()).await.unwrap());

    let second = conversation(ConversationKind::Private, "alice", Some(key));
    let (second_id, created) = db.insert_private_conversation(&second, &roster).await.unwrap();
    assert!(created);
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn test_participant_activation_and_leave() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &["bob"]).await;

    // Already active
    assert!(
        !db.activate_participant(&group_id, "bob", ParticipantRole::Member, Utc::now())
            .await
            .unwrap()
    );

    assert!(db.mark_participant_left(&group_id, "bob", Utc::now()).await.unwrap());
    assert!(!db.mark_participant_left(&group_id, "bob", Utc::now()).await.unwrap());

    // Rejoin re-enters active
    assert!(
        db.activate_participant(&group_id, "bob", ParticipantRole::Member, Utc::now())
            .await
            .unwrap()
    );
    let stored = db.get_conversation(&group_id).await.unwrap().unwrap();
    assert!(stored.active_participant("bob").is_some());
}

#[tokio::test]
async fn test_list_conversations_orders_by_activity() {
    let (db, _temp_dir) = create_test_db().await;
    let older = create_group(&db, "alice", &["bob"]).await;
    let newer = create_group(&db, "alice", &["carol"]).await;

    let mut msg = message(&older, "bob", "bump");
    msg.created_at = Utc::now() + Duration::seconds(5);
    db.insert_message(&msg, &SafetyRecords::default()).await.unwrap();

    let listed = db
        .list_conversations_for_user("alice", &ConversationFilter::default(), 20, 0)
        .await
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![older.clone(), newer]);
    assert_eq!(listed[0].last_message_id.as_deref(), Some(msg.id.as_str()));
    assert_eq!(listed[0].participants.len(), 2);

    assert_eq!(db.count_unread(&older, "alice").await.unwrap(), 1);
    assert_eq!(db.count_unread(&older, "bob").await.unwrap(), 0);
}

#[tokio::test]
async fn test_reaction_upsert_keeps_one_per_user() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &["bob"]).await;
    let msg = message(&group_id, "alice", "hello");
    db.insert_message(&msg, &SafetyRecords::default()).await.unwrap();

    assert!(db.upsert_reaction(&msg.id, "bob", "👍", Utc::now()).await.unwrap());
    assert!(db.upsert_reaction(&msg.id, "bob", "❤️", Utc::now()).await.unwrap());
    // Identical state
    assert!(!db.upsert_reaction(&msg.id, "bob", "❤️", Utc::now()).await.unwrap());

    let stored = db.get_message(&msg.id).await.unwrap().unwrap();
    assert_eq!(stored.reactions.len(), 1);
    assert_eq!(stored.reactions[0].emoji, "❤️");

    assert_eq!(
        db.delete_reaction(&msg.id, "bob").await.unwrap().as_deref(),
        Some("❤️")
    );
    assert!(db.delete_reaction(&msg.id, "bob").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reads_are_idempotent_and_sender_reads_own() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &["bob"]).await;
    let msg = message(&group_id, "alice", "hello");
    db.insert_message(&msg, &SafetyRecords::default()).await.unwrap();

    let stored = db.get_message(&msg.id).await.unwrap().unwrap();
    assert!(stored.is_read_by("alice"));

    assert!(db.insert_read(&msg.id, "bob", Utc::now()).await.unwrap());
    assert!(!db.insert_read(&msg.id, "bob", Utc::now()).await.unwrap());

    let stored = db.get_message(&msg.id).await.unwrap().unwrap();
    assert_eq!(stored.read_by.len(), 2);
}

#[tokio::test]
async fn test_edit_compare_and_set() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &[]).await;
    let msg = message(&group_id, "alice", "draft");
    db.insert_message(&msg, &SafetyRecords::default()).await.unwrap();

    let safety = SafetyColumns::default();
    let none = SafetyRecords::default();
    assert!(
        db.update_message_content(&msg.id, 0, "final", &safety, &none, Utc::now())
            .await
            .unwrap()
    );
    // Stale version loses, and its flags are not written
    let records = safety_records(&msg, false);
    assert!(
        !db.update_message_content(&msg.id, 0, "stale", &safety, &records, Utc::now())
            .await
            .unwrap()
    );

    let stored = db.get_message(&msg.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "final");
    assert!(stored.is_edited);
    assert_eq!(stored.version, 1);
    assert!(db.list_flags_for_message(&msg.id).await.unwrap().is_empty());
}

fn safety_records(msg: &Message, critical: bool) -> SafetyRecords {
    let now = Utc::now();
    let keywords = vec!["want to die".to_string(), "overdose".to_string()];
    SafetyRecords {
        alert: critical.then(|| EmergencyAlert {
            id: EntityId::new().0,
            message_id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            severity: CrisisSeverity::Critical,
            keywords: Json(keywords.clone()),
            created_at: now,
            acknowledged_by: None,
            acknowledged_at: None,
        }),
        flags: vec![ModerationFlag {
            id: EntityId::new().0,
            message_id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            source: FlagSource::Crisis,
            severity: Some(CrisisSeverity::Critical),
            matched_terms: Json(keywords),
            status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
        }],
    }
}

#[tokio::test]
async fn test_message_commits_with_alert_and_flags() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &["bob"]).await;
    let msg = message(&group_id, "alice", "I want to die, overdose tonight");

    db.insert_message(&msg, &safety_records(&msg, true)).await.unwrap();

    let alerts = db.list_emergency_alerts(true, 10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message_id, msg.id);
    let flags = db.list_flags_for_message(&msg.id).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].source, FlagSource::Crisis);
}

#[tokio::test]
async fn test_failed_alert_write_rolls_back_message() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &["bob"]).await;
    sqlx::query("DROP TABLE emergency_alerts")
        .execute(db.pool())
        .await
        .unwrap();

    let msg = message(&group_id, "alice", "I want to die, overdose tonight");
    assert!(db.insert_message(&msg, &safety_records(&msg, true)).await.is_err());

    assert!(db.get_message(&msg.id).await.unwrap().is_none());
    assert!(db.list_flags_for_message(&msg.id).await.unwrap().is_empty());
    let stored = db.get_conversation(&group_id).await.unwrap().unwrap();
    assert!(stored.last_message_id.is_none());
}

#[tokio::test]
async fn test_hidden_for_excludes_from_listing() {
    let (db, _temp_dir) = create_test_db().await;
    let group_id = create_group(&db, "alice", &["bob"]).await;
    let msg = message(&group_id, "alice", "secret");
    db.insert_message(&msg, &SafetyRecords::default()).await.unwrap();

    db.hide_message_for(&msg.id, "bob", Utc::now()).await.unwrap();

    let for_bob = db.list_messages(&group_id, "bob", None, 50, 0).await.unwrap();
    assert!(for_bob.is_empty());
    let for_alice = db.list_messages(&group_id, "alice", None, 50, 0).await.unwrap();
    assert_eq!(for_alice.len(), 1);
}

#[tokio::test]
async fn test_duplicate_unresolved_report_conflicts() {
    let (db, _temp_dir) = create_test_db().await;

    let report = |id: &str| Report {
        id: id.to_string(),
        reporter_id: "alice".to_string(),
        target_kind: ReportTarget::User,
        target_id: "bob".to_string(),
        reason: ReportReason::Spam,
        description: String::new(),
        status: ReviewStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        review_notes: None,
        resolution: None,
        created_at: Utc::now(),
    };

    db.insert_report(&report("r1")).await.unwrap();
    let err = db.insert_report(&report("r2")).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Once resolved, the same reporter may report again
    assert!(
        db.review_report("r1", ReviewStatus::Dismissed, ReportResolution::Dismiss, "mod", None, Utc::now())
            .await
            .unwrap()
    );
    db.insert_report(&report("r3")).await.unwrap();

    // Terminal reports cannot transition again
    assert!(
        !db.review_report("r1", ReviewStatus::Actioned, ReportResolution::WarnUser, "mod", None, Utc::now())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_notifications_are_capped_per_recipient() {
    let (db, _temp_dir) = create_test_db().await;
    let base = Utc::now();

    for i in 0..5 {
        let notification = Notification {
            id: EntityId::new().0,
            recipient_id: "alice".to_string(),
            kind: NotificationKind::NewMessage,
            title: "New message".to_string(),
            message: format!("message {}", i),
            data: Json(serde_json::json!({ "index": i })),
            is_read: false,
            created_at: base + Duration::seconds(i),
            read_at: None,
        };
        db.insert_notification(&notification, 3).await.unwrap();
    }

    let listed = db.list_notifications("alice", false, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].message, "message 4");
    assert_eq!(listed[2].message, "message 2");
    assert_eq!(db.count_unread_notifications("alice").await.unwrap(), 3);

    assert_eq!(db.mark_all_notifications_read("alice", Utc::now()).await.unwrap(), 3);
    assert_eq!(db.count_unread_notifications("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn test_search_history_dedupes_and_caps() {
    let (db, _temp_dir) = create_test_db().await;
    let base = Utc::now();

    for i in 0..25 {
        db.insert_search_history("alice", &format!("query {}", i), base + Duration::seconds(i))
            .await
            .unwrap();
    }
    db.insert_search_history("alice", "query 24", base + Duration::seconds(30))
        .await
        .unwrap();

    let history = db.list_search_history("alice").await.unwrap();
    assert_eq!(history.len() as i64, SEARCH_HISTORY_LIMIT);
    assert_eq!(history[0].query, "query 24");
    assert_eq!(history.iter().filter(|h| h.query == "query 24").count(), 1);

    assert_eq!(db.clear_search_history("alice").await.unwrap(), 20);
}
