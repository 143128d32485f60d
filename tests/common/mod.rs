//! Common test utilities for E2E tests

#![allow(dead_code)]

use carechat::{AppState, config};
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Configuration used by every test server
pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: "chat.test.example.com".to_string(),
            protocol: "http".to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        auth: config::AuthConfig {
            session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
            session_max_age: 604800,
        },
        messaging: config::MessagingConfig::default(),
        safety: config::SafetyConfig::default(),
        notifications: config::NotificationConfig::default(),
        delivery: config::DeliveryConfig::default(),
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("test.db"));
        adjust(&mut config);

        carechat::metrics::init_metrics();

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = carechat::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: format!("http://{}", addr),
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Provision an account and return a session token for it
    pub async fn create_user(&self, id: &str) -> String {
        self.create_user_with_role(id, carechat::data::AccountRole::User)
            .await
    }

    pub async fn create_user_with_role(
        &self,
        id: &str,
        role: carechat::data::AccountRole,
    ) -> String {
        let display_name = format!("{}{}", id[..1].to_uppercase(), &id[1..]);
        self.state
            .db
            .insert_account(id, &display_name, role)
            .await
            .unwrap();
        self.token_for(id)
    }

    /// Signed session token for `user_id`
    pub fn token_for(&self, user_id: &str) -> String {
        use carechat::auth::{Session, create_session_token};

        let session = Session::new(user_id, self.state.config.auth.session_max_age);
        create_session_token(&session, &self.state.config.auth.session_secret)
            .expect("Failed to create test token")
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> (StatusCode, Value) {
        let response = request.send().await.unwrap();
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        self.send(self.client.get(self.url(path)).bearer_auth(token))
            .await
    }

    pub async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.client.post(self.url(path)).bearer_auth(token).json(&body))
            .await
    }

    pub async fn patch(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            self.client
                .patch(self.url(path))
                .bearer_auth(token)
                .json(&body),
        )
        .await
    }

    pub async fn put(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.client.put(self.url(path)).bearer_auth(token).json(&body))
            .await
    }

    pub async fn delete(&self, token: &str, path: &str) -> (StatusCode, Value) {
        self.send(self.client.delete(self.url(path)).bearer_auth(token))
            .await
    }

    /// Create a private conversation and return its id
    pub async fn create_private(&self, token: &str, other_id: &str) -> String {
        let (status, body) = self
            .post(
                token,
                "/api/v1/conversations",
                serde_json::json!({ "participantIds": [other_id], "kind": "private" }),
            )
            .await;
        assert!(status.is_success(), "create private failed: {} {}", status, body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Create a group conversation and return its id
    pub async fn create_group(&self, token: &str, name: &str, members: &[&str]) -> String {
        let (status, body) = self
            .post(
                token,
                "/api/v1/conversations",
                serde_json::json!({ "participantIds": members, "kind": "group", "name": name }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create group failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Send a text message and return the message JSON
    pub async fn send_text(&self, token: &str, conversation_id: &str, content: &str) -> Value {
        let (status, body) = self
            .post(
                token,
                &format!("/api/v1/conversations/{}/messages", conversation_id),
                serde_json::json!({ "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "send failed: {}", body);
        body["data"].clone()
    }

    /// Insert a message whose `created_at` lies `age` in the past
    pub async fn insert_backdated_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        age: Duration,
    ) -> String {
        use carechat::data::{EntityId, Message, MessageType, ModerationAction, SafetyRecords};
        use sqlx::types::Json;

        let message = Message {
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
            created_at: Utc::now() - age,
        };
        self.state
            .db
            .insert_message(&message, &SafetyRecords::default())
            .await
            .unwrap();
        message.id
    }

    /// Poll the user's notifications until one of `kind` shows up
    pub async fn wait_for_notification(&self, token: &str, kind: &str) -> Option<Value> {
        for _ in 0..50 {
            let (_, body) = self.get(token, "/api/v1/notifications").await;
            if let Some(found) = body["data"]
                .as_array()
                .and_then(|items| items.iter().find(|n| n["type"] == kind))
            {
                return Some(found.clone());
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }
        None
    }
}
