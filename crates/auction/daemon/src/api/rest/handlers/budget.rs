//! Phase policy and balance handlers

use crate::api::rest::extract::RequestActor;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use auction_types::{Amount, BidderAccount, BidderId, Outcome, PhaseBoundary, PhasePolicy, SeriesId};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

/// Policy body; the series comes from the path
#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub phases: Vec<PhaseBoundary>,
    #[serde(default)]
    pub terminal_reserve: Amount,
    pub max_items_per_bidder: u32,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    pub balance: Amount,
}

pub async fn put_policy(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(series): Path<String>,
    Json(body): Json<PolicyRequest>,
) -> ApiResult<Json<Outcome<PhasePolicy>>> {
    let policy = PhasePolicy {
        series_id: SeriesId::new(series),
        phases: body.phases,
        terminal_reserve: body.terminal_reserve,
        max_items_per_bidder: body.max_items_per_bidder,
    };
    Ok(Json(state.engine.register_policy(&actor, policy).await?))
}

/// Policy in force for a series; unrestricted when none was registered
pub async fn get_policy(
    State(state): State<AppState>,
    Path(series): Path<String>,
) -> ApiResult<Json<PhasePolicy>> {
    Ok(Json(state.engine.policy(&SeriesId::new(series)).await?))
}

pub async fn put_balance(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(bidder): Path<String>,
    Json(body): Json<BalanceRequest>,
) -> ApiResult<Json<Outcome<BidderAccount>>> {
    Ok(Json(
        state
            .engine
            .set_balance(&actor, &BidderId::new(bidder), body.balance)
            .await?,
    ))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(bidder): Path<String>,
) -> ApiResult<Json<BidderAccount>> {
    Ok(Json(state.engine.account(&BidderId::new(bidder)).await?))
}
