//! Report and moderation endpoints
//!
//! Everything under `/moderation` requires a moderator or admin account;
//! the role check lives in the service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use super::respond;
use crate::data::{ModerateAction, ReportResolution, ReviewStatus};
use crate::service::{NewReport, PageRequest};
use crate::{AppState, auth::CurrentUser, error::AppError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    #[serde(alias = "type")]
    target_kind: String,
    target_id: String,
    reason: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    /// `pending` (or `open`), `reviewed`, `actioned`, `dismissed`
    status: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

impl QueueParams {
    fn status(&self) -> Result<Option<ReviewStatus>, AppError> {
        self.status
            .as_deref()
            .map(ReviewStatus::parse_filter)
            .transpose()
    }

    fn page(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    action: String,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    action: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertParams {
    #[serde(default)]
    unacknowledged_only: bool,
}

/// POST /api/v1/reports
pub async fn create_report(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let input = NewReport {
        target_kind: req.target_kind.parse()?,
        target_id: req.target_id,
        reason: req.reason.parse()?,
        description: req.description,
    };

    let report = state.moderation.report(&session.user_id, input).await?;
    Ok((StatusCode::CREATED, respond("Report submitted", report)?))
}

/// GET /api/v1/moderation/reports
pub async fn list_reports(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<QueueParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reports = state
        .moderation
        .list_reports(&session.user_id, params.status()?, params.page())
        .await?;
    respond("Reports retrieved", reports)
}

/// POST /api/v1/moderation/reports/:id/review
pub async fn review_report(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resolution: ReportResolution = req.action.parse()?;
    let report = state
        .moderation
        .review_report(&id, &session.user_id, resolution, req.notes)
        .await?;
    respond("Report reviewed", report)
}

/// GET /api/v1/moderation/flags
pub async fn list_flags(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<QueueParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let flags = state
        .moderation
        .list_flags(&session.user_id, params.status()?, params.page())
        .await?;
    respond("Flags retrieved", flags)
}

/// POST /api/v1/moderation/messages/:id
pub async fn moderate_message(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ModerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let action: ModerateAction = req.action.parse()?;
    let message = state
        .moderation
        .moderate(&id, &session.user_id, action, &req.reason)
        .await?;
    respond("Moderation action applied", message)
}

/// GET /api/v1/moderation/messages/:id/decisions
pub async fn list_decisions(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let decisions = state
        .moderation
        .list_decisions(&session.user_id, &id)
        .await?;
    respond("Decisions retrieved", decisions)
}

/// GET /api/v1/moderation/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<AlertParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let alerts = state
        .moderation
        .list_alerts(&session.user_id, params.unacknowledged_only)
        .await?;
    respond("Emergency alerts retrieved", alerts)
}

/// POST /api/v1/moderation/alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let alert = state
        .moderation
        .acknowledge_alert(&id, &session.user_id)
        .await?;
    respond("Emergency alert acknowledged", alert)
}
