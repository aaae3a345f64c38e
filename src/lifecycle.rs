//! Query lifecycle: a pure transition table over (status, event).
//!
//! The record store is the only caller; it persists the returned status
//! and appends the matching audit entry in one transaction. The table
//! owns the core safety invariant: a query whose `human_review_required`
//! flag is set cannot reach `resolved` except through a clinician acting
//! on it in review.

use thiserror::Error;
use uuid::Uuid;

use crate::models::enums::QueryStatus;
use crate::models::query::Query;

/// Events a query can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// AI draft and safety score have been attached.
    AiCompleted,
    Assign { clinician_id: Uuid },
    OpenReview { clinician_id: Uuid },
    Respond { clinician_id: Uuid, text: String },
    RequestPatientInfo { clinician_id: Uuid },
    PatientReplied { patient_id: Uuid, text: String },
    Escalate { reason: String },
    Reassign { clinician_id: Uuid },
    /// Policy-enabled release of a safe draft without a clinician.
    AutoRelease,
    Close,
    /// Patient cancellation; only permitted before review starts.
    Cancel,
}

impl QueryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AiCompleted => "ai_completed",
            Self::Assign { .. } => "assign",
            Self::OpenReview { .. } => "open_review",
            Self::Respond { .. } => "respond",
            Self::RequestPatientInfo { .. } => "request_patient_info",
            Self::PatientReplied { .. } => "patient_replied",
            Self::Escalate { .. } => "escalate",
            Self::Reassign { .. } => "reassign",
            Self::AutoRelease => "auto_release",
            Self::Close => "close",
            Self::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("event {event} not permitted in status {from}")]
    NotPermitted {
        from: QueryStatus,
        event: &'static str,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(&'static str),

    #[error("caller is not the assigned clinician")]
    NotAssignedClinician,

    #[error("invalid event payload: {0}")]
    InvalidEvent(&'static str),
}

/// Resolve the next status for `event` applied to `query`.
///
/// Pure: no I/O, no clock, no mutation. Side effects (setting the
/// assignee, appending the official response, stamping `resolved_at`)
/// belong to the store.
pub fn transition(query: &Query, event: &QueryEvent) -> Result<QueryStatus, TransitionError> {
    use QueryStatus::*;

    let from = query.status;
    let reject = || TransitionError::NotPermitted {
        from,
        event: event.name(),
    };

    match event {
        QueryEvent::AiCompleted => {
            if from != Submitted {
                return Err(reject());
            }
            if query.ai_draft.is_none() || query.safety_score.is_none() {
                return Err(TransitionError::InvalidEvent(
                    "AI draft and safety score must be present",
                ));
            }
            Ok(Pending)
        }

        QueryEvent::Assign { .. } => match from {
            Pending => Ok(Assigned),
            _ => Err(reject()),
        },

        QueryEvent::OpenReview { clinician_id } => {
            if from != Assigned {
                return Err(reject());
            }
            if query.assigned_clinician_id != Some(*clinician_id) {
                return Err(TransitionError::NotAssignedClinician);
            }
            Ok(InReview)
        }

        QueryEvent::Respond { clinician_id, text } => {
            if text.trim().is_empty() {
                return Err(TransitionError::InvalidEvent("response text is empty"));
            }
            if from != InReview {
                // Resolving a gated query outside review is the exact
                // bypass the gate exists to stop.
                if query.human_review_required {
                    return Err(TransitionError::PolicyViolation(
                        "query requires clinician review before release",
                    ));
                }
                return Err(reject());
            }
            if query.human_review_required
                && query.assigned_clinician_id != Some(*clinician_id)
            {
                return Err(TransitionError::PolicyViolation(
                    "gated query may only be released by its assigned clinician",
                ));
            }
            Ok(Resolved)
        }

        QueryEvent::RequestPatientInfo { clinician_id } => {
            if from != InReview {
                return Err(reject());
            }
            if query.assigned_clinician_id != Some(*clinician_id) {
                return Err(TransitionError::NotAssignedClinician);
            }
            Ok(AwaitingPatientResponse)
        }

        QueryEvent::PatientReplied { text, .. } => {
            if text.trim().is_empty() {
                return Err(TransitionError::InvalidEvent("reply text is empty"));
            }
            match from {
                AwaitingPatientResponse => Ok(InReview),
                _ => Err(reject()),
            }
        }

        QueryEvent::Escalate { .. } => match from {
            Pending | Assigned | InReview => Ok(Escalated),
            _ => Err(reject()),
        },

        QueryEvent::Reassign { .. } => match from {
            Escalated => Ok(Assigned),
            _ => Err(reject()),
        },

        QueryEvent::AutoRelease => {
            if from != Pending {
                return Err(reject());
            }
            if query.human_review_required {
                return Err(TransitionError::PolicyViolation(
                    "query requires clinician review before release",
                ));
            }
            Ok(Resolved)
        }

        QueryEvent::Close => match from {
            Resolved => Ok(Closed),
            _ => Err(reject()),
        },

        QueryEvent::Cancel => match from {
            Submitted | Pending | Assigned => Ok(Closed),
            _ => Err(reject()),
        },
    }
}
