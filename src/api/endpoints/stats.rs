//! Platform statistics endpoint.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::ApiContext;
use crate::service::PlatformStats;

pub async fn stats(State(ctx): State<ApiContext>) -> Result<Json<PlatformStats>, ApiError> {
    Ok(Json(ctx.service.get_platform_stats()?))
}
