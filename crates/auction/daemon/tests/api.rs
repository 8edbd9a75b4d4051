//! REST surface driven through the router without a socket.

use auction_daemon::api::create_router;
use auction_daemon::api::rest::state::AppState;
use auction_daemon::config::SchedulerConfig;
use auction_daemon::DeadlinePoller;
use auction_engine::{AuctionEngine, EngineConfig, ManualClock};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

fn app() -> TestApp {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Arc::new(AuctionEngine::in_memory(
        EngineConfig::default(),
        "api test",
        1_000,
        clock.clone(),
    ));
    let poller = DeadlinePoller::new(SchedulerConfig::default(), engine.clone());
    TestApp {
        router: create_router(AppState::new(engine, poller), true),
        clock,
    }
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    identity: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in identity {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

const ADMIN: &[(&str, &str)] = &[("x-actor-role", "admin")];

fn bidder(id: &str) -> [(&str, &str); 2] {
    [("x-actor-role", "bidder"), ("x-bidder-id", id)]
}

fn round_body() -> Value {
    json!({
        "series_id": "league",
        "round_number": 2,
        "mode": "single",
        "item_scope": {"kind": "single", "item_id": "p1"},
        "opens_at": "2026-03-01T12:00:00Z",
        "closes_at": "2026-03-01T12:30:00Z",
        "max_bids_per_bidder": 3
    })
}

async fn create_round(router: &Router) -> String {
    let (status, body) = call(router, "POST", "/api/v1/rounds", ADMIN, Some(round_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "accepted");
    body["state"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app.router, "GET", "/api/v1/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_round_flow_over_http() {
    let app = app();
    let round_id = create_round(&app.router).await;

    for (team, amount) in [("team-a", 300), ("team-b", 200)] {
        let (status, body) = call(
            &app.router,
            "POST",
            &format!("/api/v1/rounds/{round_id}/bids"),
            &bidder(team),
            Some(json!({"item_id": "p1", "amount": amount})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "accepted");
        assert_eq!(body["state"]["sealed"], true);
        assert!(body["state"]["amount"].is_null());
    }

    let (_, mine) = call(
        &app.router,
        "GET",
        &format!("/api/v1/rounds/{round_id}/bids/mine"),
        &bidder("team-a"),
        None,
    )
    .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    app.clock.advance(Duration::minutes(31));
    let (status, closed) = call(
        &app.router,
        "POST",
        &format!("/api/v1/rounds/{round_id}/close"),
        ADMIN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["outcome"], "accepted");
    assert_eq!(closed["state"]["status"], "completed");

    let (_, detail) = call(
        &app.router,
        "GET",
        &format!("/api/v1/rounds/{round_id}"),
        &[],
        None,
    )
    .await;
    assert_eq!(detail["allocation_count"], 1);
    assert_eq!(detail["allocations"][0]["bidder_id"], "team-a");
    assert_eq!(detail["allocations"][0]["price"], 300);

    let (_, account) = call(&app.router, "GET", "/api/v1/accounts/team-a", &[], None).await;
    assert_eq!(account["balance"], 700);
}

#[tokio::test]
async fn test_rejections_are_ok_responses() {
    let app = app();
    let round_id = create_round(&app.router).await;

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/rounds/{round_id}/close"),
        &bidder("team-a"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "rejected");
    assert_eq!(body["code"], "unauthorized");

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/rounds/{round_id}/bids"),
        &bidder("team-a"),
        Some(json!({"item_id": "p1", "amount": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "amount_below_floor");
}

#[tokio::test]
async fn test_missing_identity_and_unknown_round() {
    let app = app();
    let (status, body) = call(&app.router, "POST", "/api/v1/rounds", &[], Some(round_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let missing = uuid_like();
    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/v1/rounds/{missing}"),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = call(&app.router, "GET", "/api/v1/rounds/not-a-uuid", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deadline_poll_requires_operator() {
    let app = app();
    let (status, _) = call(
        &app.router,
        "POST",
        "/api/v1/deadlines/poll",
        &bidder("team-a"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let round_id = create_round(&app.router).await;
    app.clock.advance(Duration::minutes(31));
    let (status, report) = call(&app.router, "POST", "/api/v1/deadlines/poll", ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["closed"][0], round_id);
}

fn uuid_like() -> &'static str {
    "7f1c2a4e-9d3b-4f6a-8c1e-2b5d7e9f0a13"
}
