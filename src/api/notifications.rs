//! Notification endpoints

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;

use super::respond;
use crate::service::PageRequest;
use crate::{AppState, auth::CurrentUser, error::AppError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsParams {
    #[serde(default)]
    unread_only: bool,
    page: Option<u32>,
    limit: Option<u32>,
}

/// GET /api/v1/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<NotificationsParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let page = PageRequest {
        page: params.page,
        limit: params.limit,
    };
    let notifications = state
        .notifications
        .list(&session.user_id, params.unread_only, page)
        .await?;
    respond("Notifications retrieved", notifications)
}

/// GET /api/v1/notifications/unread_count
pub async fn unread_count(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.notifications.unread_count(&session.user_id).await?;
    respond("Unread count retrieved", serde_json::json!({ "count": count }))
}

/// POST /api/v1/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.notifications.mark_read(&id, &session.user_id).await?;
    respond("Notification marked as read", serde_json::json!({ "id": id }))
}

/// POST /api/v1/notifications/read_all
pub async fn mark_all_read(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.notifications.mark_all_read(&session.user_id).await?;
    respond(
        "All notifications marked as read",
        serde_json::json!({ "updated": updated }),
    )
}

/// DELETE /api/v1/notifications/:id
pub async fn delete_notification(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.notifications.delete(&id, &session.user_id).await?;
    respond("Notification deleted", serde_json::json!({ "id": id }))
}
