//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Messaging Metrics
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_messages_sent_total", "Total number of messages committed"),
        &["message_type", "origin"]
    ).expect("metric can be created");
    pub static ref MESSAGE_MUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_message_mutations_total", "Total number of message mutations"),
        &["mutation"]
    ).expect("metric can be created");

    // Safety Metrics
    pub static ref CRISIS_DETECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_crisis_detections_total", "Messages flagged by the crisis classifier"),
        &["severity"]
    ).expect("metric can be created");
    pub static ref EMERGENCY_ALERTS_TOTAL: IntCounter = IntCounter::new(
        "carechat_emergency_alerts_total",
        "Emergency alerts recorded for critical crisis detections"
    ).expect("metric can be created");
    pub static ref POLICY_FLAGS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_policy_flags_total", "Messages flagged for policy violations"),
        &["category"]
    ).expect("metric can be created");
    pub static ref MODERATION_ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_moderation_actions_total", "Moderator actions applied"),
        &["action"]
    ).expect("metric can be created");

    // Delivery Metrics
    pub static ref FANOUT_DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_fanout_deliveries_total", "Real-time events handed to the transport"),
        &["event"]
    ).expect("metric can be created");
    pub static ref FANOUT_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_fanout_failures_total", "Real-time events the transport failed to deliver"),
        &["event"]
    ).expect("metric can be created");
    pub static ref CONNECTED_STREAMS: IntGauge = IntGauge::new(
        "carechat_connected_streams",
        "Currently open event streams"
    ).expect("metric can be created");
    pub static ref NOTIFICATIONS_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_notifications_created_total", "Durable notifications created"),
        &["kind"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("carechat_errors_total", "Total number of API errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; instruments are registered on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(MESSAGES_SENT_TOTAL.clone()))
            .expect("MESSAGES_SENT_TOTAL can be registered");
        REGISTRY
            .register(Box::new(MESSAGE_MUTATIONS_TOTAL.clone()))
            .expect("MESSAGE_MUTATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CRISIS_DETECTIONS_TOTAL.clone()))
            .expect("CRISIS_DETECTIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(EMERGENCY_ALERTS_TOTAL.clone()))
            .expect("EMERGENCY_ALERTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(POLICY_FLAGS_TOTAL.clone()))
            .expect("POLICY_FLAGS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(MODERATION_ACTIONS_TOTAL.clone()))
            .expect("MODERATION_ACTIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FANOUT_DELIVERIES_TOTAL.clone()))
            .expect("FANOUT_DELIVERIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FANOUT_FAILURES_TOTAL.clone()))
            .expect("FANOUT_FAILURES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CONNECTED_STREAMS.clone()))
            .expect("CONNECTED_STREAMS can be registered");
        REGISTRY
            .register(Box::new(NOTIFICATIONS_CREATED_TOTAL.clone()))
            .expect("NOTIFICATIONS_CREATED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
