//! Conversation endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::respond;
use crate::data::{ConversationFilter, ConversationKind, ParticipantRole, ParticipantStateUpdate};
use crate::service::{CreateConversation, PageRequest};
use crate::{AppState, auth::CurrentUser, error::AppError};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// `private` or `group`
    kind: Option<String>,
    archived: Option<bool>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    participant_ids: Vec<String>,
    #[serde(alias = "type")]
    kind: String,
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    new_owner_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRequest {
    mute: Option<bool>,
    muted_until: Option<DateTime<Utc>>,
    archive: Option<bool>,
    last_read_message_id: Option<String>,
}

/// GET /api/v1/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = ConversationFilter {
        kind: params
            .kind
            .as_deref()
            .map(str::parse::<ConversationKind>)
            .transpose()?,
        archived: params.archived,
    };
    let page = PageRequest {
        page: params.page,
        limit: params.limit,
    };

    let conversations = state
        .conversations
        .list(&session.user_id, filter, page)
        .await?;
    respond("Conversations retrieved", conversations)
}

/// POST /api/v1/conversations
///
/// Returns 201 for a new conversation and 200 when an existing private
/// conversation is returned.
pub async fn create_conversation(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let input = CreateConversation {
        participant_ids: req.participant_ids,
        kind: req.kind.parse()?,
        name: req.name,
        description: req.description,
    };

    let (conversation, created) = state
        .conversations
        .create(&session.user_id, input)
        .await?;

    if created {
        Ok((
            StatusCode::CREATED,
            respond("Conversation created", conversation)?,
        ))
    } else {
        Ok((
            StatusCode::OK,
            respond("Conversation already exists", conversation)?,
        ))
    }
}

/// GET /api/v1/conversations/:id
pub async fn get_conversation(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let conversation = state.conversations.get(&id, &session.user_id).await?;
    respond("Conversation retrieved", conversation)
}

/// PATCH /api/v1/conversations/:id
pub async fn update_conversation(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateConversationRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let conversation = state
        .conversations
        .update_details(&id, &session.user_id, req.name, req.description)
        .await?;
    respond("Conversation updated", conversation)
}

/// DELETE /api/v1/conversations/:id
pub async fn delete_conversation(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.conversations.delete(&id, &session.user_id).await?;
    respond("Conversation deleted", serde_json::json!({ "id": id }))
}

/// POST /api/v1/conversations/:id/participants
pub async fn add_participant(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let conversation = state
        .conversations
        .add_participant(&id, &session.user_id, &req.user_id)
        .await?;
    respond("Participant added", conversation)
}

/// DELETE /api/v1/conversations/:id/participants/:user_id
pub async fn remove_participant(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .conversations
        .remove_participant(&id, &session.user_id, &user_id)
        .await?;
    respond(
        "Participant removed",
        serde_json::json!({ "conversationId": id, "userId": user_id }),
    )
}

/// PUT /api/v1/conversations/:id/participants/:user_id/role
pub async fn set_participant_role(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path((id, user_id)): Path<(String, String)>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let role: ParticipantRole = req.role.parse()?;
    let conversation = state
        .conversations
        .set_participant_role(&id, &session.user_id, &user_id, role)
        .await?;
    respond("Participant role updated", conversation)
}

/// POST /api/v1/conversations/:id/leave
pub async fn leave_conversation(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.conversations.leave(&id, &session.user_id).await?;
    respond("Left conversation", serde_json::json!({ "conversationId": id }))
}

/// POST /api/v1/conversations/:id/transfer
pub async fn transfer_ownership(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let conversation = state
        .conversations
        .transfer_ownership(&id, &session.user_id, &req.new_owner_id)
        .await?;
    respond("Ownership transferred", conversation)
}

/// PATCH /api/v1/conversations/:id/settings
pub async fn update_settings(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let update = ParticipantStateUpdate {
        mute: req.mute,
        muted_until: req.muted_until,
        archive: req.archive,
        last_read_message_id: req.last_read_message_id,
    };
    let participant = state
        .conversations
        .update_participant_state(&id, &session.user_id, update)
        .await?;
    respond("Settings updated", participant)
}

/// POST /api/v1/conversations/:id/read
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let marked = state.conversations.mark_read(&id, &session.user_id).await?;
    respond(
        "Conversation marked as read",
        serde_json::json!({ "conversationId": id, "markedCount": marked }),
    )
}

/// POST /api/v1/conversations/:id/viewing
///
/// Heartbeat sent while the conversation is on screen.
pub async fn touch_viewing(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .conversations
        .touch_viewing(&id, &session.user_id)
        .await?;
    respond("Viewing", serde_json::json!({ "conversationId": id }))
}
