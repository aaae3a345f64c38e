use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::specialty::Specialty;

/// A reviewing clinician.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clinician {
    pub id: Uuid,
    pub full_name: String,
    pub specialties: Vec<Specialty>,
    pub license_number: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Clinician {
    pub fn new(full_name: impl Into<String>, specialties: Vec<Specialty>) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.into(),
            specialties,
            license_number: None,
            last_seen_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn has_specialty(&self, specialty: &Specialty) -> bool {
        self.specialties.iter().any(|s| s == specialty)
    }
}
