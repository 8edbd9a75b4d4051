//! Health and deadline handlers

use crate::api::rest::extract::RequestActor;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use auction_engine::PollReport;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub now: chrono::DateTime<chrono::Utc>,

    /// Result of the most recent deadline sweep, if any ran yet
    pub last_sweep: Option<PollReport>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        now: state.engine.now(),
        last_sweep: state.poller.last_report().await,
    })
}

/// Run one deadline sweep now. Lets an external scheduler drive the
/// engine when the in-process poller is disabled.
pub async fn poll_deadlines(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<PollReport>> {
    if !actor.is_operator() {
        return Err(ApiError::Unauthorized(
            "deadline sweeps are for operators".to_string(),
        ));
    }
    Ok(Json(state.poller.sweep().await?))
}
