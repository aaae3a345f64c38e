//! Query intake, processing, and clinician review endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::ApiContext;
use crate::assignment::ReviewDecision;
use crate::models::enums::{QueryCategory, QueryPriority};
use crate::models::query::Query;
use crate::service::PatientReply;

use super::VitalsPayload;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQueryRequest {
    pub patient_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub vitals: Option<VitalsPayload>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIdResponse {
    pub query_id: Uuid,
}

pub async fn submit(
    State(ctx): State<ApiContext>,
    Json(body): Json<SubmitQueryRequest>,
) -> Result<Json<QueryIdResponse>, ApiError> {
    let category = body
        .category
        .map(|c| {
            c.parse::<QueryCategory>()
                .map_err(|_| ApiError::BadRequest(format!("invalid category: {c}")))
        })
        .transpose()?;
    let priority = body
        .priority
        .map(|p| {
            p.parse::<QueryPriority>()
                .map_err(|_| ApiError::BadRequest(format!("invalid priority: {p}")))
        })
        .transpose()?;
    let vitals = body.vitals.map(|v| v.into_vitals());

    let query_id = ctx.service.submit_query(
        &body.patient_id,
        &body.title,
        &body.description,
        category,
        priority,
        vitals.as_ref(),
    )?;
    Ok(Json(QueryIdResponse { query_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQueryRequest {
    pub patient_id: Uuid,
    pub query_text: String,
    pub vitals: Option<VitalsPayload>,
}

pub async fn process(
    State(ctx): State<ApiContext>,
    Json(body): Json<ProcessQueryRequest>,
) -> Result<Json<PatientReply>, ApiError> {
    let vitals = body.vitals.map(|v| v.into_vitals());
    let reply = ctx
        .service
        .process_medical_query(&body.patient_id, &body.query_text, vitals.as_ref())
        .await?;
    Ok(Json(reply))
}

pub async fn get(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
) -> Result<Json<Query>, ApiError> {
    let query = ctx
        .service
        .get_query(&query_id)?
        .ok_or_else(|| ApiError::NotFound("query not found".into()))?;
    Ok(Json(query))
}

pub async fn pending(State(ctx): State<ApiContext>) -> Result<Json<Vec<Query>>, ApiError> {
    Ok(Json(ctx.service.get_pending_queries()?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub clinician_id: Uuid,
    pub response_text: String,
}

pub async fn respond(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<Query>, ApiError> {
    let query =
        ctx.service
            .respond_to_query(&query_id, &body.clinician_id, &body.response_text)?;
    Ok(Json(query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeRequest {
    pub clinician_id: Uuid,
}

pub async fn take(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<TakeRequest>,
) -> Result<Json<Query>, ApiError> {
    let query = ctx.service.take_query(&query_id, &body.clinician_id)?;
    Ok(Json(query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub clinician_id: Uuid,
    pub decision: String,
    pub text: Option<String>,
    pub note: Option<String>,
}

pub async fn review(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<Query>, ApiError> {
    let decision = match body.decision.as_str() {
        "approve" => ReviewDecision::Approve,
        "edit" => ReviewDecision::Edit {
            text: body
                .text
                .ok_or_else(|| ApiError::BadRequest("edit requires text".into()))?,
        },
        "reject" => ReviewDecision::Reject {
            reason: body.text.unwrap_or_else(|| "rejected".into()),
        },
        other => {
            return Err(ApiError::BadRequest(format!("invalid decision: {other}")));
        }
    };
    let query = ctx.service.review_query(
        &query_id,
        &body.clinician_id,
        decision,
        body.note.as_deref(),
    )?;
    Ok(Json(query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfoRequest {
    pub clinician_id: Uuid,
}

pub async fn request_info(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<RequestInfoRequest>,
) -> Result<Json<Query>, ApiError> {
    let query = ctx
        .service
        .request_patient_info(&query_id, &body.clinician_id)?;
    Ok(Json(query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientReplyRequest {
    pub patient_id: Uuid,
    pub text: String,
}

pub async fn reply(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<PatientReplyRequest>,
) -> Result<Json<Query>, ApiError> {
    let query = ctx
        .service
        .record_patient_reply(&query_id, &body.patient_id, &body.text)?;
    Ok(Json(query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub patient_id: Uuid,
}

pub async fn cancel(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<Query>, ApiError> {
    let query = ctx.service.cancel_query(&query_id, &body.patient_id)?;
    Ok(Json(query))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRequest {
    pub patient_id: Uuid,
    pub rating: u8,
}

pub async fn rate(
    State(ctx): State<ApiContext>,
    Path(query_id): Path<Uuid>,
    Json(body): Json<RateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.service
        .rate_query(&query_id, &body.patient_id, body.rating)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
