//! Patient query: the central record the lifecycle state machine owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{QueryCategory, QueryPriority, QueryStatus, RiskLabel, Urgency};
use super::specialty::Specialty;

/// Structured AI analysis attached after the bridge round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    /// Model self-reported confidence in [0, 1].
    pub confidence: f32,
    pub flagged_symptoms: Vec<String>,
    pub suggested_specialty: Option<Specialty>,
    pub risk_label: RiskLabel,
    pub model_version: String,
    pub analyzed_at: DateTime<Utc>,
}

/// One message on a query thread (clinician response or patient reply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMessage {
    pub id: Uuid,
    pub responder_id: Uuid,
    pub body: String,
    pub is_official: bool,
    pub attachments: Vec<String>,
    pub read_by_patient: bool,
    pub read_by_clinician: bool,
    pub sent_at: DateTime<Utc>,
}

impl QueryMessage {
    pub fn official(responder_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            responder_id,
            body: body.into(),
            is_official: true,
            attachments: Vec::new(),
            read_by_patient: false,
            read_by_clinician: true,
            sent_at: Utc::now(),
        }
    }

    /// A patient's reply on the thread; never an official release.
    pub fn patient_reply(responder_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            responder_id,
            body: body.into(),
            is_official: false,
            attachments: Vec::new(),
            read_by_patient: true,
            read_by_clinician: false,
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: QueryCategory,
    pub priority: QueryPriority,
    pub status: QueryStatus,
    pub assigned_clinician_id: Option<Uuid>,
    pub ai_analysis: Option<AiAnalysis>,
    pub ai_draft: Option<String>,
    pub safety_score: Option<u8>,
    pub urgency: Option<Urgency>,
    pub human_review_required: bool,
    pub messages: Vec<QueryMessage>,
    pub attachments: Vec<String>,
    pub satisfaction_rating: Option<u8>,
    /// Optimistic-concurrency tag, bumped on every committed write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Query {
    pub fn new(
        patient_id: Uuid,
        title: impl Into<String>,
        description: impl Into<String>,
        category: QueryCategory,
        priority: QueryPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            title: title.into(),
            description: description.into(),
            category,
            priority,
            status: QueryStatus::Submitted,
            assigned_clinician_id: None,
            ai_analysis: None,
            ai_draft: None,
            safety_score: None,
            urgency: None,
            human_review_required: false,
            messages: Vec::new(),
            attachments: Vec::new(),
            satisfaction_rating: None,
            version: 1,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            resolved_at: None,
        }
    }

    /// Whole minutes between creation and resolution; `None` until the
    /// query reaches a terminal state.
    pub fn response_time_minutes(&self) -> Option<i64> {
        let resolved = self.resolved_at?;
        Some((resolved - self.created_at).num_minutes().max(0))
    }
}
