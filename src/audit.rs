//! Append-only audit log: action tags and entry shapes.
//!
//! Entries are written inside the same transaction as the mutation they
//! describe; the store refuses the whole write if the audit insert
//! fails. Nothing ever updates or deletes an entry except retention
//! pruning.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// What happened. One tag per mutation kind across C1–C7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PatientRegistered,
    PatientUpdated,
    PatientDeactivated,
    ClinicianRegistered,
    QuerySubmitted,
    ConsentBlocked,
    AiCompleted,
    AiFallbackServed,
    AiCacheHit,
    QueryAssigned,
    ReviewOpened,
    ReviewDecision,
    QueryResolved,
    AutoReleased,
    PatientInfoRequested,
    PatientReplied,
    QueryEscalated,
    QueryReassigned,
    QueryClosed,
    QueryCancelled,
    QueryRated,
    BridgeRegistered,
    BridgeProcessing,
    BridgeCompleted,
    BridgeFailed,
    BridgeSwept,
    WebhookApplied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatientRegistered => "patient_registered",
            Self::PatientUpdated => "patient_updated",
            Self::PatientDeactivated => "patient_deactivated",
            Self::ClinicianRegistered => "clinician_registered",
            Self::QuerySubmitted => "query_submitted",
            Self::ConsentBlocked => "consent_blocked",
            Self::AiCompleted => "ai_completed",
            Self::AiFallbackServed => "ai_fallback_served",
            Self::AiCacheHit => "ai_cache_hit",
            Self::QueryAssigned => "query_assigned",
            Self::ReviewOpened => "review_opened",
            Self::ReviewDecision => "review_decision",
            Self::QueryResolved => "query_resolved",
            Self::AutoReleased => "auto_released",
            Self::PatientInfoRequested => "patient_info_requested",
            Self::PatientReplied => "patient_replied",
            Self::QueryEscalated => "query_escalated",
            Self::QueryReassigned => "query_reassigned",
            Self::QueryClosed => "query_closed",
            Self::QueryCancelled => "query_cancelled",
            Self::QueryRated => "query_rated",
            Self::BridgeRegistered => "bridge_registered",
            Self::BridgeProcessing => "bridge_processing",
            Self::BridgeCompleted => "bridge_completed",
            Self::BridgeFailed => "bridge_failed",
            Self::BridgeSwept => "bridge_swept",
            Self::WebhookApplied => "webhook_applied",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The clinician-decision tag the review gate looks for (invariant:
/// a gated query may not resolve without one of these in its trail).
pub fn is_review_decision(action: &str) -> bool {
    action == AuditAction::ReviewDecision.as_str()
}

/// A pending audit entry, built at the mutation site.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub actor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub query_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub client_info: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            actor_id: None,
            patient_id: None,
            query_id: None,
            detail: serde_json::json!({}),
            client_info: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn actor(mut self, id: Uuid) -> Self {
        self.actor_id = Some(id);
        self
    }

    pub fn patient(mut self, id: Uuid) -> Self {
        self.patient_id = Some(id);
        self
    }

    pub fn query(mut self, id: Uuid) -> Self {
        self.query_id = Some(id);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn client(mut self, info: impl Into<String>) -> Self {
        self.client_info = Some(info.into());
        self
    }
}

/// A committed audit entry as read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Monotone sequence number (SQLite rowid).
    pub id: i64,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub query_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub client_info: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
