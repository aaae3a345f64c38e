//! Medical context assembly: one normalized document per patient,
//! consumed by the safety scorer and the AI bridge prompt.
//!
//! Missing fields are carried as explicit `unknown` tokens. A context
//! assembled for a patient the store does not know is minimal (every
//! field unknown) and forces the human-review gate downstream.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::datum::Datum;
use crate::models::enums::{DiabetesType, Gender};
use crate::models::patient::{Patient, VitalSigns};

/// Coarse age grouping; precise age never leaves the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBucket {
    Child,
    Adolescent,
    Adult,
    Older,
}

impl AgeBucket {
    pub fn from_years(years: u32) -> Self {
        match years {
            0..=12 => Self::Child,
            13..=17 => Self::Adolescent,
            18..=64 => Self::Adult,
            _ => Self::Older,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Adolescent => "adolescent",
            Self::Adult => "adult",
            Self::Older => "older_adult",
        }
    }
}

impl std::fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Glucose bucket used by the bridge cache key and the urgent-handling
/// short circuit. Boundaries align with the scorer's deduction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseBucket {
    Unknown,
    SevereLow,
    Low,
    InRange,
    High,
    VeryHigh,
    Critical,
}

impl GlucoseBucket {
    pub fn from_mg_dl(glucose: Datum<f64>) -> Self {
        match glucose.get() {
            None => Self::Unknown,
            Some(g) if g < 54.0 => Self::SevereLow,
            Some(g) if g < 70.0 => Self::Low,
            Some(g) if g <= 250.0 => Self::InRange,
            Some(g) if g <= 300.0 => Self::High,
            Some(g) if g <= 400.0 => Self::VeryHigh,
            Some(_) => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::SevereLow => "severe_low",
            Self::Low => "low",
            Self::InRange => "in_range",
            Self::High => "high",
            Self::VeryHigh => "very_high",
            Self::Critical => "critical",
        }
    }

    /// Buckets that mandate urgent handling without waiting for the
    /// model (glucose < 70 or > 300).
    pub fn mandates_urgent_handling(&self) -> bool {
        matches!(
            self,
            Self::SevereLow | Self::Low | Self::VeryHigh | Self::Critical
        )
    }
}

/// The normalized context document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalContext {
    pub patient_id: Option<Uuid>,
    pub age_bucket: Datum<AgeBucket>,
    pub gender: Datum<Gender>,
    pub diabetes_type: Datum<DiabetesType>,
    pub conditions: Datum<Vec<String>>,
    pub medications: Datum<Vec<String>>,
    pub allergies: Datum<Vec<String>>,
    pub family_history: Datum<Vec<String>>,
    pub vitals: VitalSigns,
    pub primary_clinician_id: Option<Uuid>,
}

impl MedicalContext {
    /// Build the context from a known patient record.
    pub fn assemble(patient: &Patient) -> Self {
        let age_bucket = patient
            .age_years(Utc::now().date_naive())
            .map(AgeBucket::from_years)
            .into();
        Self {
            patient_id: Some(patient.id),
            age_bucket,
            gender: patient.gender,
            diabetes_type: patient.diabetes_type,
            conditions: Datum::known(patient.history.conditions.clone()),
            medications: Datum::known(patient.history.medications.clone()),
            allergies: Datum::known(patient.history.allergies.clone()),
            family_history: Datum::known(patient.history.family_history.clone()),
            vitals: patient.latest_vitals.clone(),
            primary_clinician_id: patient.primary_clinician_id,
        }
    }

    /// The minimal context for a patient the store does not know.
    pub fn unknown() -> Self {
        Self {
            patient_id: None,
            age_bucket: Datum::Unknown,
            gender: Datum::Unknown,
            diabetes_type: Datum::Unknown,
            conditions: Datum::Unknown,
            medications: Datum::Unknown,
            allergies: Datum::Unknown,
            family_history: Datum::Unknown,
            vitals: VitalSigns::default(),
            primary_clinician_id: None,
        }
    }

    /// A minimal context has no patient identity behind it; the service
    /// must force human review for anything scored against it.
    pub fn is_minimal(&self) -> bool {
        self.patient_id.is_none()
    }

    pub fn glucose_bucket(&self) -> GlucoseBucket {
        GlucoseBucket::from_mg_dl(self.vitals.glucose_mg_dl)
    }

    /// Render the context block for the LLM user message. Every line is
    /// present with a literal `unknown` token when data is missing.
    pub fn render_prompt(&self) -> String {
        fn list_line(list: &Datum<Vec<String>>) -> String {
            match list.as_known() {
                Some(items) if items.is_empty() => "none recorded".to_string(),
                Some(items) => items.join(", "),
                None => "unknown".to_string(),
            }
        }

        let v = &self.vitals;
        format!(
            "Patient profile:\n\
             - age group: {}\n\
             - gender: {}\n\
             - diabetes type: {}\n\
             - conditions: {}\n\
             - medications: {}\n\
             - allergies: {}\n\
             - family history: {}\n\
             Latest vitals:\n\
             - blood glucose (mg/dL): {}\n\
             - blood pressure: {}/{}\n\
             - heart rate: {}\n\
             - temperature (C): {}\n\
             - oxygen saturation: {}",
            self.age_bucket,
            self.gender,
            self.diabetes_type,
            list_line(&self.conditions),
            list_line(&self.medications),
            list_line(&self.allergies),
            list_line(&self.family_history),
            v.glucose_mg_dl,
            v.systolic,
            v.diastolic,
            v.heart_rate,
            v.temperature_c,
            v.oxygen_saturation,
        )
    }
}
