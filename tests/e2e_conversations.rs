//! E2E tests for the conversation store: creation, membership, settings
//! and lifecycle events

mod common;

use common::TestServer;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_private_conversation_creation_is_idempotent() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;

    let (status, first) = server
        .post(
            &alice,
            "/api/v1/conversations",
            json!({ "participantIds": ["bob"], "kind": "private" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Reverse argument order
    let (status, second) = server
        .post(
            &bob,
            "/api/v1/conversations",
            json!({ "participantIds": ["alice"], "type": "private" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["id"], second["data"]["id"]);

    let (_, list) = server.get(&alice, "/api/v1/conversations").await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_private_conversation_rules() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    server.create_user("bob").await;
    server.create_user("carol").await;

    let (status, _) = server
        .post(
            &alice,
            "/api/v1/conversations",
            json!({ "participantIds": ["bob", "carol"], "kind": "private" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post(
            &alice,
            "/api/v1/conversations",
            json!({ "participantIds": ["nobody"], "kind": "private" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server
        .post(
            &alice,
            "/api/v1/conversations",
            json!({ "participantIds": ["bob"], "kind": "channel" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");

    server.state.db.insert_block("bob", "alice").await.unwrap();
    let (status, _) = server
        .post(
            &alice,
            "/api/v1/conversations",
            json!({ "participantIds": ["bob"], "kind": "private" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_group_membership_requires_admin() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;
    server.create_user("carol").await;

    let id = server.create_group(&alice, "Peer circle", &["bob"]).await;
    let path = format!("/api/v1/conversations/{}/participants", id);

    let (status, _) = server.post(&bob, &path, json!({ "userId": "carol" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .post(&alice, &path, json!({ "userId": "carol" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let active = body["data"]["participants"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["leftAt"].is_null())
        .count();
    assert_eq!(active, 3);

    let (status, body) = server
        .post(&alice, &path, json!({ "userId": "carol" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_group_requires_name() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    server.create_user("bob").await;

    let (status, _) = server
        .post(
            &alice,
            "/api/v1/conversations",
            json!({ "participantIds": ["bob"], "kind": "group", "name": "   " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_owner_cannot_be_removed_and_must_transfer_before_leaving() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;

    let id = server.create_group(&alice, "Peer circle", &["bob"]).await;

    let (status, _) = server
        .put(
            &alice,
            &format!("/api/v1/conversations/{}/participants/bob/role", id),
            json!({ "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .delete(
            &bob,
            &format!("/api/v1/conversations/{}/participants/alice", id),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let leave = format!("/api/v1/conversations/{}/leave", id);
    let (status, _) = server.post(&alice, &leave, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = server
        .post(
            &alice,
            &format!("/api/v1/conversations/{}/transfer", id),
            json!({ "newOwnerId": "bob" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ownerId"], "bob");

    let (status, _) = server.post(&alice, &leave, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .get(&alice, &format!("/api/v1/conversations/{}", id))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_conversation_list_orders_by_activity_with_unread_counts() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;
    let carol = server.create_user("carol").await;

    let with_bob = server.create_private(&alice, "bob").await;
    let with_carol = server.create_private(&alice, "carol").await;

    server.send_text(&bob, &with_bob, "hi alice").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.send_text(&carol, &with_carol, "hey there").await;
    server.send_text(&carol, &with_carol, "are you around?").await;

    let (status, body) = server.get(&alice, "/api/v1/conversations").await;
    assert_eq!(status, StatusCode::OK);
    let list = body["data"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], with_carol.as_str());
    assert_eq!(list[0]["unreadCount"], 2);
    assert_eq!(list[1]["id"], with_bob.as_str());
    assert_eq!(list[1]["unreadCount"], 1);

    let (status, body) = server
        .post(
            &alice,
            &format!("/api/v1/conversations/{}/read", with_carol),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["markedCount"], 2);

    let (_, body) = server.get(&alice, "/api/v1/conversations").await;
    assert_eq!(body["data"][0]["unreadCount"], 0);

    // Senders never count their own messages as unread
    let (_, body) = server.get(&carol, "/api/v1/conversations").await;
    assert_eq!(body["data"][0]["unreadCount"], 0);
}

#[tokio::test]
async fn test_settings_are_self_service_and_validated() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;

    let first = server.create_private(&alice, "bob").await;
    server.create_user("carol").await;
    let other = server.create_private(&alice, "carol").await;
    let foreign = server.send_text(&alice, &other, "elsewhere").await;

    let path = format!("/api/v1/conversations/{}/settings", first);
    let (status, body) = server
        .patch(&bob, &path, json!({ "mute": true, "archive": true }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isMuted"], true);
    assert_eq!(body["data"]["isArchived"], true);

    let (_, body) = server
        .get(&bob, "/api/v1/conversations?archived=true")
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (_, body) = server
        .get(&bob, "/api/v1/conversations?archived=false")
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = server
        .patch(
            &bob,
            &path,
            json!({ "lastReadMessageId": foreign["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_and_delete_group() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;

    let id = server.create_group(&alice, "Peer circle", &["bob"]).await;
    let path = format!("/api/v1/conversations/{}", id);

    let (status, _) = server
        .patch(&bob, &path, json!({ "name": "Renamed" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .patch(
            &alice,
            &path,
            json!({ "name": "Evening circle", "description": "Weekly check-in" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Evening circle");
    assert_eq!(body["data"]["description"], "Weekly check-in");

    let (status, _) = server.delete(&bob, &path).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server.delete(&alice, &path).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server.get(&alice, &path).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleted_private_conversation_can_be_recreated() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    server.create_user("bob").await;

    let first = server.create_private(&alice, "bob").await;
    let (status, _) = server
        .delete(&alice, &format!("/api/v1/conversations/{}", first))
        .await;
    assert_eq!(status, StatusCode::OK);

    let second = server.create_private(&alice, "bob").await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_muted_participant_still_receives_removal_notice() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;
    server.create_user("carol").await;

    let id = server
        .create_group(&alice, "Peer circle", &["bob", "carol"])
        .await;

    let (status, _) = server
        .patch(
            &bob,
            &format!("/api/v1/conversations/{}/settings", id),
            json!({ "mute": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut events = server.state.hub.subscribe("bob").await;

    // Ordinary traffic is silenced by mute
    server.send_text(&alice, &id, "group update").await;

    let (status, _) = server
        .delete(
            &alice,
            &format!("/api/v1/conversations/{}/participants/bob", id),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert!(!names.contains(&"new-message"), "muted user got {:?}", names);
    assert!(names.contains(&"participant-removed"), "got {:?}", names);
    assert!(names.contains(&"removed-from-conversation"), "got {:?}", names);

    let notice = server
        .wait_for_notification(&bob, "removed_from_conversation")
        .await
        .expect("removal notification");
    assert_eq!(notice["data"]["conversationId"], id.as_str());
    assert_eq!(notice["isRead"], false);
}

#[tokio::test]
async fn test_event_stream_delivers_new_messages() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice").await;
    let bob = server.create_user("bob").await;
    let id = server.create_private(&alice, "bob").await;

    let mut response = server
        .client
        .get(server.url("/api/v1/streaming"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.send_text(&alice, &id, "hello over the stream").await;

    let mut received = String::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(Some(chunk)) = response.chunk().await {
            received.push_str(&String::from_utf8_lossy(&chunk));
            if received.contains("hello over the stream") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(found, "stream output: {}", received);
    assert!(received.contains("event: new-message"));
}
