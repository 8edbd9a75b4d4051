//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        .route("/deadlines/poll", post(handlers::poll_deadlines))
        // Rounds
        .route("/rounds", post(handlers::create_round))
        .route("/rounds/:id", get(handlers::get_round))
        .route("/rounds/:id/close", post(handlers::close_round))
        .route("/rounds/:id/finalize", post(handlers::finalize_round))
        .route("/rounds/:id/reconcile", post(handlers::reconcile_round))
        .route("/rounds/:id/cancel", post(handlers::cancel_round))
        .route("/rounds/:id/extend", post(handlers::extend_round))
        .route("/rounds/:id/preview", get(handlers::preview_round))
        .route("/rounds/:id/tiebreakers", get(handlers::list_round_tiebreakers))
        // Bids
        .route("/rounds/:id/bids", post(handlers::submit_bid))
        .route("/rounds/:id/bids/mine", get(handlers::my_bids))
        .route(
            "/rounds/:id/bids/:bid_id",
            put(handlers::revise_bid).delete(handlers::withdraw_bid),
        )
        // Tiebreakers
        .route("/tiebreakers/:id", get(handlers::get_tiebreaker))
        .route("/tiebreakers/:id/revisions", post(handlers::submit_revision))
        .route("/tiebreakers/:id/raises", post(handlers::raise))
        .route("/tiebreakers/:id/withdraw", post(handlers::withdraw_from_tiebreaker))
        .route("/tiebreakers/:id/resolve", post(handlers::resolve_tiebreaker))
        .route("/tiebreakers/:id/close", post(handlers::close_tiebreaker))
        .route("/tiebreakers/:id/extend", post(handlers::extend_tiebreaker))
        // Budget
        .route(
            "/series/:id/policy",
            put(handlers::put_policy).get(handlers::get_policy),
        )
        .route(
            "/accounts/:bidder",
            put(handlers::put_balance).get(handlers::get_account),
        )
        // Events
        .route("/audit", get(handlers::get_audit))
        .route("/events/stream", get(handlers::stream_events));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
