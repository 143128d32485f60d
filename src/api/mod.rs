//! API layer
//!
//! HTTP handlers for:
//! - Conversations and participants
//! - Messages, reactions, receipts and search
//! - Reports and the moderation queue
//! - Notifications
//! - Server-Sent Events streaming
//! - Metrics (Prometheus)

mod conversations;
mod messages;
pub mod metrics;
mod moderation;
mod notifications;
mod streaming;

use axum::{
    Router,
    response::Json,
    routing::{get, post, put},
};
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;

pub use metrics::metrics_router;

/// Success envelope: `{ "success": true, "message": ..., "data": ... }`
pub(crate) fn respond<T: Serialize>(
    message: &str,
    data: T,
) -> Result<Json<serde_json::Value>, AppError> {
    let data = serde_json::to_value(data).map_err(|e| AppError::Internal(e.into()))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": message,
        "data": data,
    })))
}

/// Create the `/api/v1` router
///
/// Every route requires an authenticated session.
pub fn api_router() -> Router<AppState> {
    Router::new()
        // Conversations
        .route(
            "/v1/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/v1/conversations/:id",
            get(conversations::get_conversation)
                .patch(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route(
            "/v1/conversations/:id/participants",
            post(conversations::add_participant),
        )
        .route(
            "/v1/conversations/:id/participants/:user_id",
            axum::routing::delete(conversations::remove_participant),
        )
        .route(
            "/v1/conversations/:id/participants/:user_id/role",
            put(conversations::set_participant_role),
        )
        .route(
            "/v1/conversations/:id/leave",
            post(conversations::leave_conversation),
        )
        .route(
            "/v1/conversations/:id/transfer",
            post(conversations::transfer_ownership),
        )
        .route(
            "/v1/conversations/:id/settings",
            axum::routing::patch(conversations::update_settings),
        )
        .route(
            "/v1/conversations/:id/read",
            post(conversations::mark_conversation_read),
        )
        .route(
            "/v1/conversations/:id/viewing",
            post(conversations::touch_viewing),
        )
        // Messages
        .route(
            "/v1/conversations/:id/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/v1/conversations/:id/pinned",
            get(messages::list_pinned),
        )
        .route("/v1/messages/search", get(messages::search_messages))
        .route(
            "/v1/messages/:id",
            get(messages::get_message)
                .patch(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route(
            "/v1/messages/:id/reactions",
            get(messages::list_reactions)
                .post(messages::add_reaction)
                .delete(messages::remove_reaction),
        )
        .route("/v1/messages/:id/read", post(messages::mark_read))
        .route(
            "/v1/messages/:id/pin",
            post(messages::pin_message).delete(messages::unpin_message),
        )
        .route("/v1/messages/:id/forward", post(messages::forward_message))
        .route(
            "/v1/search/history",
            get(messages::search_history).delete(messages::clear_search_history),
        )
        // Reports and moderation
        .route("/v1/reports", post(moderation::create_report))
        .route("/v1/moderation/reports", get(moderation::list_reports))
        .route(
            "/v1/moderation/reports/:id/review",
            post(moderation::review_report),
        )
        .route("/v1/moderation/flags", get(moderation::list_flags))
        .route(
            "/v1/moderation/messages/:id",
            post(moderation::moderate_message),
        )
        .route(
            "/v1/moderation/messages/:id/decisions",
            get(moderation::list_decisions),
        )
        .route("/v1/moderation/alerts", get(moderation::list_alerts))
        .route(
            "/v1/moderation/alerts/:id/acknowledge",
            post(moderation::acknowledge_alert),
        )
        // Notifications
        .route(
            "/v1/notifications",
            get(notifications::list_notifications),
        )
        .route(
            "/v1/notifications/unread_count",
            get(notifications::unread_count),
        )
        .route(
            "/v1/notifications/read_all",
            post(notifications::mark_all_read),
        )
        .route(
            "/v1/notifications/:id/read",
            post(notifications::mark_read),
        )
        .route(
            "/v1/notifications/:id",
            axum::routing::delete(notifications::delete_notification),
        )
        // Streaming
        .route("/v1/streaming", get(streaming::stream_events))
}
