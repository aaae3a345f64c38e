//! Patient and clinician registration endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::ApiContext;
use crate::models::datum::Datum;
use crate::models::enums::{BloodType, DiabetesType, Gender, QueryStatus};
use crate::models::patient::{ConsentFlags, ContactPreferences, MedicalHistory, Patient};
use crate::models::specialty::Specialty;
use crate::service::QueryPage;

use super::VitalsPayload;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentsPayload {
    #[serde(default)]
    pub treatment: bool,
    #[serde(default)]
    pub privacy_acknowledged: bool,
    #[serde(default)]
    pub data_processing: bool,
}

impl From<ConsentsPayload> for ConsentFlags {
    fn from(p: ConsentsPayload) -> Self {
        Self {
            treatment: p.treatment,
            privacy_acknowledged: p.privacy_acknowledged,
            data_processing: p.data_processing,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPatientRequest {
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub consents: ConsentsPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientIdResponse {
    pub patient_id: Uuid,
}

pub async fn register(
    State(ctx): State<ApiContext>,
    Json(body): Json<RegisterPatientRequest>,
) -> Result<Json<PatientIdResponse>, ApiError> {
    let patient_id = ctx.service.register_patient(
        &body.full_name,
        body.date_of_birth,
        body.consents.into(),
    )?;
    Ok(Json(PatientIdResponse { patient_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedPatientRequest {
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub diabetes_type: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub family_history: Vec<String>,
    #[serde(default)]
    pub surgeries: Vec<String>,
    pub vitals: Option<VitalsPayload>,
    pub primary_clinician_id: Option<Uuid>,
    pub consents: ConsentsPayload,
    pub email_updates: Option<bool>,
    pub sms_reminders: Option<bool>,
}

fn parse_enum<T: std::str::FromStr>(field: &str, raw: Option<String>) -> Result<Datum<T>, ApiError> {
    match raw {
        Some(s) => s
            .parse::<T>()
            .map(Datum::Known)
            .map_err(|_| ApiError::BadRequest(format!("invalid {field}: {s}"))),
        None => Ok(Datum::Unknown),
    }
}

pub async fn register_enhanced(
    State(ctx): State<ApiContext>,
    Json(body): Json<EnhancedPatientRequest>,
) -> Result<Json<PatientIdResponse>, ApiError> {
    let mut patient = Patient::new(body.full_name.clone(), body.consents.into());
    patient.date_of_birth = body.date_of_birth;
    patient.gender = parse_enum::<Gender>("gender", body.gender)?;
    patient.blood_type = parse_enum::<BloodType>("bloodType", body.blood_type)?;
    patient.diabetes_type = parse_enum::<DiabetesType>("diabetesType", body.diabetes_type)?;
    patient.history = MedicalHistory {
        conditions: body.conditions,
        medications: body.medications,
        allergies: body.allergies,
        family_history: body.family_history,
        surgeries: body.surgeries,
    };
    if let Some(vitals) = body.vitals {
        patient.latest_vitals = vitals.into_vitals();
    }
    patient.primary_clinician_id = body.primary_clinician_id;
    patient.contact = ContactPreferences {
        email_updates: body.email_updates.unwrap_or(true),
        sms_reminders: body.sms_reminders.unwrap_or(false),
    };

    let patient_id = ctx.service.create_enhanced_patient(patient)?;
    Ok(Json(PatientIdResponse { patient_id }))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

pub async fn set_active(
    State(ctx): State<ApiContext>,
    Path(patient_id): Path<Uuid>,
    Json(body): Json<SetActiveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.service.set_patient_active(&patient_id, body.active)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientQueriesParams {
    pub status: Option<String>,
    #[serde(default)]
    pub page: u32,
    pub per_page: Option<u32>,
}

pub async fn list_queries(
    State(ctx): State<ApiContext>,
    Path(patient_id): Path<Uuid>,
    Query(params): Query<PatientQueriesParams>,
) -> Result<Json<QueryPage>, ApiError> {
    let status = params
        .status
        .map(|s| {
            s.parse::<QueryStatus>()
                .map_err(|_| ApiError::BadRequest(format!("invalid status: {s}")))
        })
        .transpose()?;
    let page = ctx.service.get_patient_queries(
        &patient_id,
        status,
        params.page,
        params.per_page.unwrap_or(20),
    )?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClinicianRequest {
    pub full_name: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicianIdResponse {
    pub clinician_id: Uuid,
}

pub async fn register_clinician(
    State(ctx): State<ApiContext>,
    Json(body): Json<RegisterClinicianRequest>,
) -> Result<Json<ClinicianIdResponse>, ApiError> {
    let specialties = body
        .specialties
        .iter()
        .map(|s| Specialty::parse_label(s))
        .collect();
    let clinician_id =
        ctx.service
            .register_clinician(&body.full_name, specialties, body.license_number)?;
    Ok(Json(ClinicianIdResponse { clinician_id }))
}
