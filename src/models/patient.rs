//! Patient record: demographics, medical history, latest vitals,
//! consent flags, and communication preferences.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::datum::Datum;
use super::enums::{BloodType, DiabetesType, Gender};

/// Most recent vital signs for a patient. Every measurement is an
/// explicit known/unknown datum so downstream scoring never guesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VitalSigns {
    pub glucose_mg_dl: Datum<f64>,
    pub systolic: Datum<u16>,
    pub diastolic: Datum<u16>,
    pub heart_rate: Datum<u16>,
    pub temperature_c: Datum<f64>,
    pub oxygen_saturation: Datum<u8>,
    pub weight_kg: Datum<f64>,
    pub bmi: Datum<f64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl VitalSigns {
    /// True when no measurement is known at all.
    pub fn is_empty(&self) -> bool {
        self.glucose_mg_dl.is_unknown()
            && self.systolic.is_unknown()
            && self.diastolic.is_unknown()
            && self.heart_rate.is_unknown()
            && self.temperature_c.is_unknown()
            && self.oxygen_saturation.is_unknown()
            && self.weight_kg.is_unknown()
            && self.bmi.is_unknown()
    }
}

/// Condition, medication, allergy, family, and surgical history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MedicalHistory {
    pub conditions: Vec<String>,
    pub medications: Vec<String>,
    pub allergies: Vec<String>,
    pub family_history: Vec<String>,
    pub surgeries: Vec<String>,
}

/// Consent flags. All three must be granted before a query may leave
/// the submitted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConsentFlags {
    pub treatment: bool,
    pub privacy_acknowledged: bool,
    pub data_processing: bool,
}

impl ConsentFlags {
    pub fn granted() -> Self {
        Self {
            treatment: true,
            privacy_acknowledged: true,
            data_processing: true,
        }
    }

    pub fn all_granted(&self) -> bool {
        self.treatment && self.privacy_acknowledged && self.data_processing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPreferences {
    pub email_updates: bool,
    pub sms_reminders: bool,
}

impl Default for ContactPreferences {
    fn default() -> Self {
        Self {
            email_updates: true,
            sms_reminders: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Datum<Gender>,
    pub blood_type: Datum<BloodType>,
    pub diabetes_type: Datum<DiabetesType>,
    pub history: MedicalHistory,
    pub latest_vitals: VitalSigns,
    pub primary_clinician_id: Option<Uuid>,
    pub active: bool,
    pub consents: ConsentFlags,
    pub contact: ContactPreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Minimal record as produced by registration.
    pub fn new(full_name: impl Into<String>, consents: ConsentFlags) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.into(),
            date_of_birth: None,
            gender: Datum::Unknown,
            blood_type: Datum::Unknown,
            diabetes_type: Datum::Unknown,
            history: MedicalHistory::default(),
            latest_vitals: VitalSigns::default(),
            primary_clinician_id: None,
            active: true,
            consents,
            contact: ContactPreferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whole years since date of birth, when known.
    pub fn age_years(&self, today: NaiveDate) -> Option<u32> {
        let dob = self.date_of_birth?;
        let mut age = today.years_since(dob)?;
        // years_since already accounts for month/day; clamp for safety
        if age > 130 {
            age = 130;
        }
        Some(age)
    }
}
