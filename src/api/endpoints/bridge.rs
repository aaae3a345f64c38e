//! Bridge webhook endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::ApiContext;
use crate::reconciler::{BridgeWebhook, WebhookOutcome};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub status: &'static str,
    pub applied: bool,
}

pub async fn webhook(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Json(body): Json<BridgeWebhook>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let client_info = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("webhook:{v}"));

    let outcome = ctx.service.apply_webhook(&body, client_info)?;
    let applied = matches!(outcome, WebhookOutcome::Applied(_));
    Ok(Json(WebhookResponse {
        status: "ok",
        applied,
    }))
}
