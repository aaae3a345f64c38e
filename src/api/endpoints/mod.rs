pub mod bridge;
pub mod health;
pub mod patients;
pub mod queries;
pub mod stats;

use serde::Deserialize;

use crate::models::patient::VitalSigns;

/// Vitals as reported over the wire (all optional; camelCase).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsPayload {
    pub blood_glucose: Option<f64>,
    pub systolic: Option<u16>,
    pub diastolic: Option<u16>,
    pub heart_rate: Option<u16>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<u8>,
    pub weight_kg: Option<f64>,
    pub bmi: Option<f64>,
}

impl VitalsPayload {
    pub fn into_vitals(self) -> VitalSigns {
        VitalSigns {
            glucose_mg_dl: self.blood_glucose.into(),
            systolic: self.systolic.into(),
            diastolic: self.diastolic.into(),
            heart_rate: self.heart_rate.into(),
            temperature_c: self.temperature.into(),
            oxygen_saturation: self.oxygen_saturation.into(),
            weight_kg: self.weight_kg.into(),
            bmi: self.bmi.into(),
            recorded_at: Some(chrono::Utc::now()),
        }
    }
}
