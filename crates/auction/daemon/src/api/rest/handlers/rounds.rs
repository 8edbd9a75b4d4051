//! Round lifecycle handlers

use crate::api::rest::extract::{parse_round_id, RequestActor};
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use auction_engine::{
    ExtendTarget, Extended, Finalization, Reconciliation, ResolutionReport, RoundDetail,
};
use auction_types::{NewRound, Outcome, Round, Tiebreaker};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

/// Extension request body, shared by rounds and tiebreakers
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub minutes: u32,
}

/// Create a round
pub async fn create_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<NewRound>,
) -> ApiResult<Json<Outcome<Round>>> {
    Ok(Json(state.engine.create_round(&actor, request).await?))
}

/// Round detail with bid and allocation counts
pub async fn get_round(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RoundDetail>> {
    let round_id = parse_round_id(&id)?;
    state
        .engine
        .round_detail(&round_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Round {} not found", round_id)))
}

pub async fn close_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<Round>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(state.engine.close_round(&actor, &round_id).await?))
}

pub async fn finalize_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<Finalization>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(state.engine.finalize_round(&actor, &round_id).await?))
}

pub async fn reconcile_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<Reconciliation>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(state.engine.reconcile(&actor, &round_id).await?))
}

pub async fn cancel_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<Round>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(state.engine.cancel_round(&actor, &round_id).await?))
}

pub async fn extend_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
    Json(request): Json<ExtendRequest>,
) -> ApiResult<Json<Outcome<Extended>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(
        state
            .engine
            .extend(&actor, ExtendTarget::Round { round_id }, request.minutes)
            .await?,
    ))
}

/// Dry-run resolution of a closed round
pub async fn preview_round(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<ResolutionReport>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(state.engine.preview(&actor, &round_id).await?))
}

pub async fn list_round_tiebreakers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Tiebreaker>>> {
    let round_id = parse_round_id(&id)?;
    Ok(Json(state.engine.round_tiebreakers(&round_id).await?))
}
