//! Sealed bid handlers
//!
//! The acting bidder comes from the identity headers, never from the body.

use crate::api::rest::extract::{parse_bid_id, parse_round_id, RequestActor};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use auction_engine::BidRequest;
use auction_types::{Amount, BidView, ItemId, Outcome};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

/// Bid body for submit and revise
#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub item_id: ItemId,
    pub amount: Amount,
}

pub async fn submit_bid(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(id): Path<String>,
    Json(body): Json<PlaceBidRequest>,
) -> ApiResult<Json<Outcome<BidView>>> {
    let request = BidRequest {
        round_id: parse_round_id(&id)?,
        bidder_id: actor.bidder_id()?,
        item_id: body.item_id,
        amount: body.amount,
    };
    Ok(Json(state.engine.submit_bid(&actor.0, request).await?))
}

pub async fn revise_bid(
    State(state): State<AppState>,
    actor: RequestActor,
    Path((id, bid_id)): Path<(String, String)>,
    Json(body): Json<PlaceBidRequest>,
) -> ApiResult<Json<Outcome<BidView>>> {
    let bid_id = parse_bid_id(&bid_id)?;
    let request = BidRequest {
        round_id: parse_round_id(&id)?,
        bidder_id: actor.bidder_id()?,
        item_id: body.item_id,
        amount: body.amount,
    };
    Ok(Json(state.engine.revise_bid(&actor.0, bid_id, request).await?))
}

pub async fn withdraw_bid(
    State(state): State<AppState>,
    actor: RequestActor,
    Path((id, bid_id)): Path<(String, String)>,
) -> ApiResult<Json<Outcome<BidView>>> {
    let round_id = parse_round_id(&id)?;
    let bid_id = parse_bid_id(&bid_id)?;
    let bidder_id = actor.bidder_id()?;
    Ok(Json(
        state
            .engine
            .withdraw_bid(&actor.0, &round_id, &bidder_id, &bid_id)
            .await?,
    ))
}

/// The caller's own bids; sealed bids show no item and no amount
pub async fn my_bids(
    State(state): State<AppState>,
    actor: RequestActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<BidView>>> {
    let round_id = parse_round_id(&id)?;
    let bidder_id = actor.bidder_id()?;
    Ok(Json(
        state.engine.bids_for_bidder(&round_id, &bidder_id).await?,
    ))
}
