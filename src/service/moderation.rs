//! Moderation gateway
//!
//! Records automatic flags and emergency alerts from the classifier, accepts
//! user reports and applies moderator decisions. Reports and flags share the
//! review state machine `pending -> reviewed -> actioned | dismissed`.

use chrono::Utc;
use serde_json::json;
use sqlx::types::Json;
use std::sync::Arc;
use std::time::Duration;

use super::{AccountDirectory, NotificationService, PageRequest, spawn_best_effort};
use crate::data::{
    CrisisSeverity, Database, EmergencyAlert, EntityId, FlagSource, Message, ModerateAction,
    ModerationDecision, ModerationFlag, NotificationKind, Report, ReportReason, ReportResolution,
    ReportTarget, ReviewStatus, SafetyRecords, UserSummary,
};
use crate::delivery::{DeliveryEvent, Fanout};
use crate::error::AppError;
use crate::metrics::{
    CRISIS_DETECTIONS_TOTAL, EMERGENCY_ALERTS_TOTAL, MODERATION_ACTIONS_TOTAL, POLICY_FLAGS_TOTAL,
};
use crate::safety::Assessment;

const MAX_DESCRIPTION_CHARS: usize = 1000;
const MAX_ALERTS: i64 = 200;

/// Input for `ModerationService::report`
#[derive(Debug, Clone)]
pub struct NewReport {
    pub target_kind: ReportTarget,
    pub target_id: String,
    pub reason: ReportReason,
    pub description: String,
}

/// Moderation service
#[derive(Clone)]
pub struct ModerationService {
    db: Arc<Database>,
    accounts: Arc<dyn AccountDirectory>,
    fanout: Fanout,
    notifications: NotificationService,
    tombstone: String,
    timeout: Duration,
}

impl ModerationService {
    pub fn new(
        db: Arc<Database>,
        accounts: Arc<dyn AccountDirectory>,
        fanout: Fanout,
        notifications: NotificationService,
        tombstone: String,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            accounts,
            fanout,
            notifications,
            tombstone,
            timeout,
        }
    }

    /// Resolve the actor as an active moderator or admin
    pub async fn require_moderator(&self, actor_id: &str) -> Result<UserSummary, AppError> {
        match self.accounts.resolve_user(actor_id).await? {
            Some(user) if user.is_active && user.role.can_moderate() => Ok(user),
            _ => Err(AppError::forbidden("Moderator privileges required")),
        }
    }

    // =========================================================================
    // Classifier verdicts
    // =========================================================================

    /// Flags and, for a critical verdict, the emergency alert for a message
    ///
    /// The records are written in the same transaction as the message
    /// content they describe, so a stored critical message always has its
    /// alert.
    pub fn detection_records(message: &Message, assessment: &Assessment) -> SafetyRecords {
        let now = Utc::now();
        let crisis = &assessment.crisis;
        let policy = &assessment.policy;
        let flag = |source: FlagSource, severity: Option<CrisisSeverity>, terms: &[String]| {
            ModerationFlag {
                id: EntityId::new().0,
                message_id: message.id.clone(),
                conversation_id: message.conversation_id.clone(),
                sender_id: message.sender_id.clone(),
                source,
                severity,
                matched_terms: Json(terms.to_vec()),
                status: ReviewStatus::Pending,
                reviewed_by: None,
                reviewed_at: None,
                created_at: now,
            }
        };

        let mut records = SafetyRecords::default();
        if crisis.is_critical() {
            records.alert = Some(EmergencyAlert {
                id: EntityId::new().0,
                message_id: message.id.clone(),
                conversation_id: message.conversation_id.clone(),
                sender_id: message.sender_id.clone(),
                severity: CrisisSeverity::Critical,
                keywords: Json(crisis.keywords.clone()),
                created_at: now,
                acknowledged_by: None,
                acknowledged_at: None,
            });
        }
        if crisis.detected {
            records
                .flags
                .push(flag(FlagSource::Crisis, crisis.severity, &crisis.keywords));
        }
        if policy.is_flagged() {
            records.flags.push(flag(FlagSource::Policy, None, &policy.terms));
        }
        records
    }

    /// Count and log committed detections; moderators hear about an
    /// emergency alert through a detached notification
    pub fn announce_detection(
        &self,
        message: &Message,
        assessment: &Assessment,
        records: &SafetyRecords,
    ) {
        let crisis = &assessment.crisis;
        if crisis.detected {
            let severity = crisis.severity.map(|s| s.as_str()).unwrap_or("low");
            CRISIS_DETECTIONS_TOTAL.with_label_values(&[severity]).inc();
        }
        for category in &assessment.policy.categories {
            POLICY_FLAGS_TOTAL
                .with_label_values(&[category.as_str()])
                .inc();
        }
        if assessment.policy.is_flagged() {
            tracing::info!(
                message_id = %message.id,
                categories = ?assessment.policy.categories,
                "Message flagged for policy review"
            );
        }

        let Some(alert) = &records.alert else {
            return;
        };
        EMERGENCY_ALERTS_TOTAL.inc();
        tracing::error!(
            alert_id = %alert.id,
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %message.sender_id,
            keywords = ?crisis.keywords,
            "Emergency alert: critical crisis language detected"
        );

        let this = self.clone();
        let data = json!({
            "alertId": alert.id,
            "messageId": message.id,
            "conversationId": message.conversation_id,
            "senderId": message.sender_id,
            "keywords": crisis.keywords,
        });
        spawn_best_effort("crisis_escalation", self.timeout, async move {
            let moderators = this.accounts.list_moderators().await?;
            this.notifications
                .notify_many(
                    &moderators,
                    NotificationKind::CrisisEscalation,
                    "Critical crisis language detected in a conversation".to_string(),
                    data,
                )
                .await
        });
    }

    // =========================================================================
    // Moderator actions
    // =========================================================================

    /// Apply a moderator action to a message
    pub async fn moderate(
        &self,
        message_id: &str,
        moderator_id: &str,
        action: ModerateAction,
        reason: &str,
    ) -> Result<Message, AppError> {
        self.require_moderator(moderator_id).await?;
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let now = Utc::now();
        self.db
            .apply_moderation(message_id, action, moderator_id, &self.tombstone, now)
            .await?;
        self.db
            .insert_decision(&ModerationDecision {
                id: EntityId::new().0,
                message_id: message_id.to_string(),
                moderator_id: moderator_id.to_string(),
                action,
                reason: reason.to_string(),
                created_at: now,
            })
            .await?;

        let status = action.resolves_to();
        self.db
            .resolve_flags_for_message(message_id, status, moderator_id, now)
            .await?;
        let reporters = self
            .db
            .resolve_reports_for_message(message_id, status, moderator_id, now)
            .await?;

        if action.records_warning() {
            self.accounts
                .record_warning(&message.sender_id, moderator_id, reason, Some(message_id))
                .await?;
        }

        MODERATION_ACTIONS_TOTAL
            .with_label_values(&[action.as_str()])
            .inc();
        tracing::info!(%message_id, %moderator_id, action = %action, "Moderation action applied");

        if let Some(conversation) = self.db.get_conversation(&message.conversation_id).await? {
            self.fanout
                .to_conversation(
                    &conversation,
                    DeliveryEvent::MessageModerated {
                        message_id: message_id.to_string(),
                        action: action.annotation(),
                    },
                )
                .await;
            if action == ModerateAction::Delete && !message.is_deleted {
                self.fanout
                    .to_conversation(
                        &conversation,
                        DeliveryEvent::MessageDeleted {
                            message_id: message_id.to_string(),
                            deleted_by: moderator_id.to_string(),
                            delete_for_everyone: true,
                        },
                    )
                    .await;
            }
        }

        if matches!(
            action,
            ModerateAction::Warn | ModerateAction::Hide | ModerateAction::Delete
        ) {
            let text = match action {
                ModerateAction::Hide => "One of your messages was hidden by a moderator",
                ModerateAction::Delete => "One of your messages was removed by a moderator",
                _ => "One of your messages received a moderation warning",
            };
            self.notifications
                .notify_many(
                    std::slice::from_ref(&message.sender_id),
                    NotificationKind::ModerationWarning,
                    text.to_string(),
                    json!({ "messageId": message_id, "action": action, "reason": reason }),
                )
                .await?;
        }

        if status.is_terminal() && !reporters.is_empty() {
            self.notifications
                .notify_many(
                    &reporters,
                    NotificationKind::ReportResolved,
                    "A message you reported has been reviewed".to_string(),
                    json!({ "messageId": message_id, "status": status }),
                )
                .await?;
        }

        self.db
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// File a report against a message or a user
    pub async fn report(&self, reporter_id: &str, input: NewReport) -> Result<Report, AppError> {
        if input.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(AppError::Validation(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        match input.target_kind {
            ReportTarget::Message => {
                let message = self
                    .db
                    .get_message(&input.target_id)
                    .await?
                    .ok_or(AppError::NotFound)?;
                if message.sender_id == reporter_id {
                    return Err(AppError::validation("You cannot report your own message"));
                }
                let participated = self
                    .db
                    .get_conversation(&message.conversation_id)
                    .await?
                    .is_some_and(|c| c.participant(reporter_id).is_some());
                if !participated {
                    return Err(AppError::forbidden(
                        "You can only report messages from your conversations",
                    ));
                }
            }
            ReportTarget::User => {
                if input.target_id == reporter_id {
                    return Err(AppError::validation("You cannot report yourself"));
                }
                if self.accounts.resolve_user(&input.target_id).await?.is_none() {
                    return Err(AppError::NotFound);
                }
            }
        }

        let report = Report {
            id: EntityId::new().0,
            reporter_id: reporter_id.to_string(),
            target_kind: input.target_kind,
            target_id: input.target_id,
            reason: input.reason,
            description: input.description,
            status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            resolution: None,
            created_at: Utc::now(),
        };
        self.db.insert_report(&report).await?;
        tracing::info!(report_id = %report.id, target_kind = %report.target_kind, reason = %report.reason, "Report filed");

        if report.reason == ReportReason::SelfHarm {
            let this = self.clone();
            let data = json!({
                "reportId": report.id,
                "targetKind": report.target_kind,
                "targetId": report.target_id,
            });
            spawn_best_effort("self_harm_report", self.timeout, async move {
                let moderators = this.accounts.list_moderators().await?;
                this.notifications
                    .notify_many(
                        &moderators,
                        NotificationKind::CrisisEscalation,
                        "A self-harm report needs review".to_string(),
                        data,
                    )
                    .await
            });
        }

        Ok(report)
    }

    /// Review a report and apply the chosen resolution
    pub async fn review_report(
        &self,
        report_id: &str,
        moderator_id: &str,
        resolution: ReportResolution,
        notes: Option<String>,
    ) -> Result<Report, AppError> {
        self.require_moderator(moderator_id).await?;
        let report = self
            .db
            .get_report(report_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if report.status.is_terminal() {
            return Err(AppError::conflict("Report has already been resolved"));
        }

        // The user a warning or ban applies to
        let (subject_id, message_id) = match report.target_kind {
            ReportTarget::User => (report.target_id.clone(), None),
            ReportTarget::Message => {
                let message = self
                    .db
                    .get_message(&report.target_id)
                    .await?
                    .ok_or(AppError::NotFound)?;
                (message.sender_id, Some(message.id))
            }
        };
        if matches!(
            resolution,
            ReportResolution::HideMessage | ReportResolution::DeleteMessage
        ) && message_id.is_none()
        {
            return Err(AppError::validation(
                "Message resolutions require a message report",
            ));
        }

        let status = resolution.resulting_status();
        let reviewed = self
            .db
            .review_report(
                report_id,
                status,
                resolution,
                moderator_id,
                notes.as_deref(),
                Utc::now(),
            )
            .await?;
        if !reviewed {
            return Err(AppError::conflict("Report has already been resolved"));
        }

        let reason = notes
            .clone()
            .unwrap_or_else(|| format!("Report upheld: {}", report.reason));
        match resolution {
            ReportResolution::Dismiss | ReportResolution::MarkReviewed => {}
            ReportResolution::WarnUser => {
                self.accounts
                    .record_warning(&subject_id, moderator_id, &reason, message_id.as_deref())
                    .await?;
                self.notifications
                    .notify_many(
                        std::slice::from_ref(&subject_id),
                        NotificationKind::ModerationWarning,
                        "Your account received a moderation warning".to_string(),
                        json!({ "reportId": report_id, "reason": reason }),
                    )
                    .await?;
            }
            ReportResolution::BanUser => {
                if !self
                    .accounts
                    .ban_user(&subject_id, moderator_id, &reason)
                    .await?
                {
                    tracing::debug!(user_id = %subject_id, "Account was already banned");
                }
            }
            ReportResolution::HideMessage | ReportResolution::DeleteMessage => {
                let action = if resolution == ReportResolution::HideMessage {
                    ModerateAction::Hide
                } else {
                    ModerateAction::Delete
                };
                if let Some(message_id) = &message_id {
                    self.moderate(message_id, moderator_id, action, &reason)
                        .await?;
                }
            }
        }

        tracing::info!(%report_id, %moderator_id, resolution = %resolution, status = %status, "Report reviewed");

        if status.is_terminal() {
            self.notifications
                .notify_many(
                    std::slice::from_ref(&report.reporter_id),
                    NotificationKind::ReportResolved,
                    "Your report has been reviewed".to_string(),
                    json!({ "reportId": report_id, "status": status }),
                )
                .await?;
        }

        self.db
            .get_report(report_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    // =========================================================================
    // Queues and audit
    // =========================================================================

    pub async fn list_reports(
        &self,
        moderator_id: &str,
        status: Option<ReviewStatus>,
        page: PageRequest,
    ) -> Result<Vec<Report>, AppError> {
        self.require_moderator(moderator_id).await?;
        let (limit, offset) = page.bounds();
        self.db.list_reports(status, limit, offset).await
    }

    pub async fn list_flags(
        &self,
        moderator_id: &str,
        status: Option<ReviewStatus>,
        page: PageRequest,
    ) -> Result<Vec<ModerationFlag>, AppError> {
        self.require_moderator(moderator_id).await?;
        let (limit, offset) = page.bounds();
        self.db.list_flags(status, limit, offset).await
    }

    pub async fn list_alerts(
        &self,
        moderator_id: &str,
        unacknowledged_only: bool,
    ) -> Result<Vec<EmergencyAlert>, AppError> {
        self.require_moderator(moderator_id).await?;
        self.db
            .list_emergency_alerts(unacknowledged_only, MAX_ALERTS)
            .await
    }

    pub async fn acknowledge_alert(
        &self,
        alert_id: &str,
        moderator_id: &str,
    ) -> Result<EmergencyAlert, AppError> {
        self.require_moderator(moderator_id).await?;
        if self.db.get_emergency_alert(alert_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        if !self
            .db
            .acknowledge_emergency_alert(alert_id, moderator_id, Utc::now())
            .await?
        {
            return Err(AppError::conflict("Alert has already been acknowledged"));
        }
        tracing::info!(%alert_id, %moderator_id, "Emergency alert acknowledged");

        self.db
            .get_emergency_alert(alert_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn list_decisions(
        &self,
        moderator_id: &str,
        message_id: &str,
    ) -> Result<Vec<ModerationDecision>, AppError> {
        self.require_moderator(moderator_id).await?;
        self.db.list_decisions(message_id).await
    }
}
