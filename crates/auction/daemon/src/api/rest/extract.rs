//! Request extractors
//!
//! Identity is established upstream. The gateway forwards it in two
//! headers: `x-actor-role` (`bidder`, `admin`, `scheduler`) and
//! `x-bidder-id`. A request with a bidder id and no role is a bidder.

use crate::error::{ApiError, ApiResult};
use auction_types::{Actor, BidId, BidderId, Role, RoundId, TiebreakerId};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const ROLE_HEADER: &str = "x-actor-role";
pub const BIDDER_HEADER: &str = "x-bidder-id";

/// The caller, as asserted by the gateway
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl RequestActor {
    /// Bidder id of a bidder caller; operators have none.
    pub fn bidder_id(&self) -> ApiResult<BidderId> {
        self.0
            .bidder_id
            .clone()
            .ok_or_else(|| ApiError::BadRequest(format!("{} header required", BIDDER_HEADER)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> ApiResult<Option<String>> {
            parts
                .headers
                .get(name)
                .map(|value| {
                    value
                        .to_str()
                        .map(|s| s.trim().to_string())
                        .map_err(|_| ApiError::Unauthorized(format!("{} is not valid text", name)))
                })
                .transpose()
        };

        let bidder_id = header(BIDDER_HEADER)?
            .filter(|id| !id.is_empty())
            .map(BidderId::new);
        let role = match header(ROLE_HEADER)?.as_deref() {
            Some("admin") => Role::Admin,
            Some("scheduler") => Role::Scheduler,
            Some("bidder") | None => Role::Bidder,
            Some(other) => {
                return Err(ApiError::Unauthorized(format!("unknown role {}", other)));
            }
        };

        match (role, bidder_id) {
            (Role::Bidder, None) => Err(ApiError::Unauthorized(format!(
                "{} header required",
                BIDDER_HEADER
            ))),
            (Role::Bidder, Some(id)) => Ok(RequestActor(Actor::bidder(id))),
            (Role::Admin, _) => Ok(RequestActor(Actor::admin())),
            (Role::Scheduler, _) => Ok(RequestActor(Actor::scheduler())),
        }
    }
}

fn parse_uuid(kind: &str, raw: &str) -> ApiResult<uuid::Uuid> {
    let trimmed = raw
        .strip_prefix(kind)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(raw);
    uuid::Uuid::parse_str(trimmed)
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} ID: {}", kind, raw)))
}

/// Accepts both the bare UUID and the displayed `round:<uuid>` form.
pub fn parse_round_id(raw: &str) -> ApiResult<RoundId> {
    parse_uuid("round", raw).map(RoundId::from_uuid)
}

pub fn parse_bid_id(raw: &str) -> ApiResult<BidId> {
    parse_uuid("bid", raw).map(BidId::from_uuid)
}

pub fn parse_tiebreaker_id(raw: &str) -> ApiResult<TiebreakerId> {
    parse_uuid("tiebreaker", raw).map(TiebreakerId::from_uuid)
}
