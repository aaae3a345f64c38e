//! Clinician assignment and review decisions.
//!
//! Selection prefers specialty fit, then the patient's own clinician,
//! then the lightest current workload with lexicographic id ties.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::clinician::Clinician;
use crate::models::specialty::Specialty;

/// Pick a clinician for review.
///
/// `clinicians` must already be the active set; `open_counts` maps
/// clinician id to open (non-terminal) query count, absent meaning 0.
pub fn select_clinician(
    clinicians: &[Clinician],
    open_counts: &HashMap<Uuid, i64>,
    suggested_specialty: Option<&Specialty>,
    primary_clinician_id: Option<Uuid>,
) -> Option<Uuid> {
    if clinicians.is_empty() {
        return None;
    }

    // 1. Specialty filter, falling back to the whole active set when
    //    nobody matches.
    let matching: Vec<&Clinician> = match suggested_specialty {
        Some(specialty) => {
            let filtered: Vec<&Clinician> = clinicians
                .iter()
                .filter(|c| c.has_specialty(specialty))
                .collect();
            if filtered.is_empty() {
                clinicians.iter().collect()
            } else {
                filtered
            }
        }
        None => clinicians.iter().collect(),
    };

    // 2. The patient's primary clinician wins when it is in the pool.
    if let Some(primary) = primary_clinician_id {
        if matching.iter().any(|c| c.id == primary) {
            return Some(primary);
        }
    }

    // 3. Least-loaded, ties broken lexicographically by identifier.
    matching
        .into_iter()
        .min_by_key(|c| {
            let load = open_counts.get(&c.id).copied().unwrap_or(0);
            (load, c.id.to_string())
        })
        .map(|c| c.id)
}

/// A clinician's verdict on a gated AI draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Release the AI draft verbatim.
    Approve,
    /// Replace the draft text before release.
    Edit { text: String },
    /// Refuse the draft; the query escalates for reassignment.
    Reject { reason: String },
}

impl ReviewDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Edit { .. } => "edit",
            Self::Reject { .. } => "reject",
        }
    }
}
