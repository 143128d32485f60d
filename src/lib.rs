//! CareChat - conversation and message delivery core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Conversation / message / moderation endpoints             │
//! │  - Notifications and SSE streaming                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Conversation store, message store                         │
//! │  - Moderation gateway, notification bridge                   │
//! │  - Crisis/safety classifier (inline on every write)          │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                 │
//! ┌───────────────────────────┐   ┌───────────────────────────────┐
//! │        Data Layer         │   │        Delivery fan-out       │
//! │  - SQLite (sqlx)          │   │  - Transport seam             │
//! │  - Active-viewer cache    │   │  - In-process EventHub        │
//! └───────────────────────────┘   └───────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `safety`: Crisis and policy classifiers
//! - `delivery`: Real-time event routing
//! - `data`: Database and cache layer
//! - `auth`: Signed session tokens
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod safety;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
///
/// Cloned for each request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// In-process transport; SSE streams subscribe here
    pub hub: Arc<delivery::EventHub>,

    pub conversations: service::ConversationService,
    pub messages: service::MessageService,
    pub moderation: service::ModerationService,
    pub notifications: service::NotificationService,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Build the classifier from the safety configuration
    /// 3. Wire transport, fan-out and caches
    /// 4. Build services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!(path = %config.database.path.display(), "Database connected");

        Ok(Self::with_database(config, Arc::new(db)))
    }

    /// Build state around an already connected database
    pub fn with_database(config: config::AppConfig, db: Arc<data::Database>) -> Self {
        // 2. Classifier
        let classifier = Arc::new(safety::SafetyClassifier::new(&config.safety));
        tracing::info!(
            crisis_keywords = config.safety.crisis_keywords.len(),
            "Safety classifier initialized"
        );
        if config.safety.crisis_keywords.is_empty() {
            tracing::warn!("safety.crisis_keywords is empty; crisis detection is disabled");
        }

        // 3. Delivery
        let hub = Arc::new(delivery::EventHub::new(config.delivery.channel_capacity));
        let timeout = Duration::from_secs(config.delivery.timeout_seconds);
        let fanout = delivery::Fanout::new(hub.clone(), timeout);
        let viewers = data::ViewerCache::new(Duration::from_secs(
            config.notifications.viewer_ttl_seconds,
        ));

        // 4. Services
        let accounts: Arc<dyn service::AccountDirectory> =
            Arc::new(service::DbAccountDirectory::new(db.clone()));
        let notifications = service::NotificationService::new(
            db.clone(),
            fanout.clone(),
            viewers,
            config.notifications.max_per_recipient,
        );
        let moderation = service::ModerationService::new(
            db.clone(),
            accounts.clone(),
            fanout.clone(),
            notifications.clone(),
            config.messaging.tombstone_text.clone(),
            timeout,
        );
        let conversations = service::ConversationService::new(
            db.clone(),
            accounts.clone(),
            fanout.clone(),
            notifications.clone(),
        );
        let messages = service::MessageService::new(
            db.clone(),
            accounts,
            classifier,
            fanout,
            notifications.clone(),
            moderation.clone(),
            config.messaging.clone(),
            timeout,
        );

        tracing::info!("Application state initialized successfully");

        Self {
            config: Arc::new(config),
            db,
            hub,
            conversations,
            messages,
            moderation,
            notifications,
        }
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    const MAX_BODY_BYTES: usize = 1024 * 1024;

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::api_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
