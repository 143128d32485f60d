//! Message endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::respond;
use crate::data::{MediaRef, MessageType, SearchFilter};
use crate::service::{PageRequest, SendMessage};
use crate::{AppState, auth::CurrentUser, error::AppError};

#[derive(Debug, Deserialize)]
pub struct ListMessagesParams {
    /// Return messages older than this message id
    before: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    content: Option<String>,
    message_type: Option<String>,
    reply_to: Option<String>,
    #[serde(default)]
    media: Vec<MediaRef>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    #[serde(default)]
    for_everyone: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    conversation_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    q: String,
    conversation_id: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

/// GET /api/v1/conversations/:id/messages
///
/// Oldest first within the requested page.
pub async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Query(params): Query<ListMessagesParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let page = PageRequest {
        page: params.page,
        limit: params.limit,
    };
    let messages = state
        .messages
        .list(&id, &session.user_id, params.before.as_deref(), page)
        .await?;
    respond("Messages retrieved", messages)
}

/// POST /api/v1/conversations/:id/messages
pub async fn send_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let input = SendMessage {
        content: req.content,
        message_type: req
            .message_type
            .as_deref()
            .map(str::parse::<MessageType>)
            .transpose()?,
        reply_to: req.reply_to,
        media: req.media,
    };

    let message = state.messages.send(&id, &session.user_id, input).await?;
    Ok((StatusCode::CREATED, respond("Message sent", message)?))
}

/// GET /api/v1/conversations/:id/pinned
pub async fn list_pinned(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let messages = state.messages.list_pinned(&id, &session.user_id).await?;
    respond("Pinned messages retrieved", messages)
}

/// GET /api/v1/messages/:id
pub async fn get_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = state.messages.get(&id, &session.user_id).await?;
    respond("Message retrieved", message)
}

/// PATCH /api/v1/messages/:id
pub async fn edit_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = state
        .messages
        .edit(&id, &session.user_id, req.content)
        .await?;
    respond("Message edited", message)
}

/// DELETE /api/v1/messages/:id?forEveryone=true
pub async fn delete_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .messages
        .delete(&id, &session.user_id, params.for_everyone)
        .await?;
    respond(
        "Message deleted",
        serde_json::json!({ "messageId": id, "deleteForEveryone": params.for_everyone }),
    )
}

/// GET /api/v1/messages/:id/reactions
pub async fn list_reactions(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reactions = state.messages.list_reactions(&id, &session.user_id).await?;
    respond("Reactions retrieved", reactions)
}

/// POST /api/v1/messages/:id/reactions
pub async fn add_reaction(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .messages
        .react(&id, &session.user_id, &req.emoji)
        .await?;
    respond(
        "Reaction added",
        serde_json::json!({ "messageId": id, "emoji": req.emoji.trim() }),
    )
}

/// DELETE /api/v1/messages/:id/reactions
pub async fn remove_reaction(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.messages.unreact(&id, &session.user_id).await?;
    respond("Reaction removed", serde_json::json!({ "messageId": id }))
}

/// POST /api/v1/messages/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let recorded = state.messages.mark_read(&id, &session.user_id).await?;
    let message = if recorded {
        "Message marked as read"
    } else {
        "Message already read"
    };
    respond(message, serde_json::json!({ "messageId": id }))
}

/// POST /api/v1/messages/:id/pin
pub async fn pin_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .messages
        .set_pinned(&id, &session.user_id, true)
        .await?;
    respond("Message pinned", serde_json::json!({ "messageId": id }))
}

/// DELETE /api/v1/messages/:id/pin
pub async fn unpin_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .messages
        .set_pinned(&id, &session.user_id, false)
        .await?;
    respond("Message unpinned", serde_json::json!({ "messageId": id }))
}

/// POST /api/v1/messages/:id/forward
pub async fn forward_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ForwardRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let forwarded = state
        .messages
        .forward(&id, &session.user_id, &req.conversation_ids)
        .await?;
    respond("Message forwarded", forwarded)
}

/// GET /api/v1/messages/search?q=...
pub async fn search_messages(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = SearchFilter {
        conversation_id: params.conversation_id,
        from: params.from,
        to: params.to,
    };
    let page = PageRequest {
        page: None,
        limit: params.limit,
    };
    let results = state
        .messages
        .search(&session.user_id, &params.q, filter, page)
        .await?;
    respond("Search completed", results)
}

/// GET /api/v1/search/history
pub async fn search_history(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let history = state.messages.search_history(&session.user_id).await?;
    respond("Search history retrieved", history)
}

/// DELETE /api/v1/search/history
pub async fn clear_search_history(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let cleared = state.messages.clear_search_history(&session.user_id).await?;
    respond(
        "Search history cleared",
        serde_json::json!({ "cleared": cleared }),
    )
}
