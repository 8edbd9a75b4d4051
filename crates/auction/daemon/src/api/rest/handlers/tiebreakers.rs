//! Tiebreaker handlers

use super::rounds::ExtendRequest;
use crate::api::rest::extract::{parse_tiebreaker_id, RequestActor};
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use auction_engine::{ExtendTarget, Extended};
use auction_types::{Amount, Outcome, ResolveMode, Tiebreaker};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(default = "default_mode")]
    pub mode: ResolveMode,
}

fn default_mode() -> ResolveMode {
    ResolveMode::Auto
}

/// Tiebreaker detail with current standings. Fixed-window revisions stay
/// hidden until the window resolves.
pub async fn get_tiebreaker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Tiebreaker>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    state
        .engine
        .tiebreaker_detail(&tiebreaker_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Tiebreaker {} not found", tiebreaker_id)))
}

/// Fixed-window revision
pub async fn submit_revision(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(id): Path<String>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Outcome<Tiebreaker>>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    let bidder_id = actor.bidder_id()?;
    Ok(Json(
        state
            .engine
            .submit_revision(&actor.0, &tiebreaker_id, &bidder_id, body.amount)
            .await?,
    ))
}

/// Continuous raise
pub async fn raise(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(id): Path<String>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Outcome<Tiebreaker>>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    let bidder_id = actor.bidder_id()?;
    Ok(Json(
        state
            .engine
            .raise(&actor.0, &tiebreaker_id, &bidder_id, body.amount)
            .await?,
    ))
}

pub async fn withdraw_from_tiebreaker(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<Tiebreaker>>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    let bidder_id = actor.bidder_id()?;
    Ok(Json(
        state
            .engine
            .withdraw_from_tiebreaker(&actor.0, &tiebreaker_id, &bidder_id)
            .await?,
    ))
}

pub async fn resolve_tiebreaker(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult<Json<Outcome<Tiebreaker>>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    Ok(Json(
        state
            .engine
            .resolve_tiebreaker(&actor, &tiebreaker_id, body.mode)
            .await?,
    ))
}

/// Admin close of a continuous auction at its standing high
pub async fn close_tiebreaker(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<Tiebreaker>>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    Ok(Json(
        state.engine.close_tiebreaker(&actor, &tiebreaker_id).await?,
    ))
}

pub async fn extend_tiebreaker(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
    Json(request): Json<ExtendRequest>,
) -> ApiResult<Json<Outcome<Extended>>> {
    let tiebreaker_id = parse_tiebreaker_id(&id)?;
    Ok(Json(
        state
            .engine
            .extend(
                &actor,
                ExtendTarget::Tiebreaker { tiebreaker_id },
                request.minutes,
            )
            .await?,
    ))
}
