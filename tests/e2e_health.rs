//! E2E tests for health, metrics and authentication

mod common;

use common::TestServer;
use reqwest::StatusCode;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_metrics_endpoint_is_prometheus_text() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("carechat_"));
}

#[tokio::test]
async fn test_api_requires_session() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/v1/conversations"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let server = TestServer::new().await;
    let token = server.create_user("alice").await;
    let tampered = format!("{}x", token);

    let (status, _) = server.get(&tampered, "/api/v1/conversations").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let server = TestServer::new().await;
    let token = server.create_user("alice").await;

    let response = server
        .client
        .get(server.url("/api/v1/notifications/unread_count"))
        .header("Cookie", format!("session={}", token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["count"], 0);
}
