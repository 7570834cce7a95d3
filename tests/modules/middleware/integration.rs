//! 中间件集成测试
//!
//! 通过 axum Router 驱动完整的请求流程

use crate::common::*;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use quotagate::{
    clock::ManualClock,
    config::{FailMode, IdentifierStrategy, QuotaConfig},
    identity::{AuthenticatedCaller, HeaderIdentityResolver, IpExtractor},
    limiter::RateLimiter,
    middleware::{rate_limit, RateLimitState},
    policy::{RouteTable, TierMultipliers},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

fn app(state: RateLimitState) -> Router {
    Router::new()
        .route("/api/sales", post(|| async { "sold" }))
        .route("/api/items", get(|| async { "items" }))
        .layer(from_fn_with_state(state, rate_limit))
}

fn request(method: &str, path: &str, peer: [u8; 4]) -> Request {
    let mut req = axum::http::Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    req
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn limiter_with(quotas: RouteTable) -> (Arc<RateLimiter>, Arc<FakeStore>) {
    let store = FakeStore::new();
    let limiter = RateLimiter::builder(ready_manager(store.clone()).await)
        .quotas(quotas)
        .privileges(TierMultipliers::new().with_tier("admin", 5))
        .clock(ManualClock::new(T0))
        .build();
    (Arc::new(limiter), store)
}

fn sales_table() -> RouteTable {
    RouteTable::new(QuotaConfig::new(100, 60)).route(
        "POST",
        "/api/sales",
        QuotaConfig::new(3, 60)
            .with_strategy(IdentifierStrategy::ByIdentity)
            .with_message("Too many sales requests"),
    )
}

#[tokio::test]
async fn test_headers_on_allowed_response() {
    let (limiter, _store) = limiter_with(sales_table()).await;
    let app = app(RateLimitState::new(limiter));

    let response = app
        .oneshot(request("GET", "/api/items", [192, 0, 2, 1]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
    assert_eq!(
        response.headers()["x-ratelimit-reset"],
        (T0 + 60).to_string().as_str()
    );
    assert!(response.headers().get("retry-after").is_none());
}

#[tokio::test]
async fn test_fourth_request_is_rejected_with_retry_hint() {
    let (limiter, _store) = limiter_with(sales_table()).await;
    let app = app(RateLimitState::new(limiter));

    for expected in ["2", "1", "0"] {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/sales", [192, 0, 2, 1]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
    }

    let response = app
        .oneshot(request("POST", "/api/sales", [192, 0, 2, 1]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(response.headers()["retry-after"], "60");

    let body = json_body(response).await;
    assert_eq!(body["error"], "Too Many Requests");
    assert_eq!(body["message"], "Too many sales requests");
    assert_eq!(body["retryAfter"], 60);
}

async fn inject_admin(mut req: Request, next: Next) -> Response {
    req.extensions_mut()
        .insert(AuthenticatedCaller::new("root").with_tier("admin"));
    next.run(req).await
}

#[tokio::test]
async fn test_authenticated_caller_from_upstream_layer() {
    let (limiter, store) = limiter_with(sales_table()).await;
    let app = app(RateLimitState::new(limiter)).layer(from_fn(inject_admin));

    let response = app
        .oneshot(request("POST", "/api/sales", [192, 0, 2, 1]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "15");
    assert!(store.keys()[0].contains(":identity:root:"));
}

#[tokio::test]
async fn test_header_identity_and_forwarded_ip() {
    let (limiter, store) = limiter_with(sales_table()).await;
    let state = RateLimitState::new(limiter)
        .with_identity_resolver(HeaderIdentityResolver::default())
        .with_ip_extractor(IpExtractor::from_headers(vec!["X-Forwarded-For"]));
    let app = app(state);

    let mut alice = request("POST", "/api/sales", [10, 0, 0, 1]);
    alice
        .headers_mut()
        .insert("x-user-id", "alice".parse().unwrap());
    let mut anonymous = request("GET", "/api/items", [10, 0, 0, 1]);
    anonymous
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.23".parse().unwrap());

    app.clone().oneshot(alice).await.unwrap();
    app.oneshot(anonymous).await.unwrap();

    let keys = store.keys();
    assert!(keys.iter().any(|k| k.contains(":identity:alice:")));
    assert!(keys.iter().any(|k| k.contains(":ip:198%2E51%2E100%2E23:")));
}

#[tokio::test]
async fn test_distinct_identities_do_not_share_quota() {
    let (limiter, _store) = limiter_with(sales_table()).await;
    let state = RateLimitState::new(limiter).with_identity_resolver(HeaderIdentityResolver::default());
    let app = app(state);

    let send = |id: &'static str| {
        let mut req = request("POST", "/api/sales", [10, 0, 0, 1]);
        req.headers_mut().insert("x-user-id", id.parse().unwrap());
        app.clone().oneshot(req)
    };

    for _ in 0..3 {
        assert_eq!(send("alice").await.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(send("alice").await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(send("bob").await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unavailable_store_keeps_serving_with_headers() {
    let (limiter, store) = limiter_with(sales_table()).await;
    store.set(&store.fail_ping, true);
    let app = app(RateLimitState::new(limiter));

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/sales", [192, 0, 2, 1]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "3");
    }
}

#[tokio::test]
async fn test_fail_closed_renders_unavailable_rejection() {
    let store = FakeStore::new();
    let limiter = RateLimiter::builder(ready_manager(store.clone()).await)
        .quotas(QuotaConfig::new(5, 60))
        .fail_mode(FailMode::Closed)
        .clock(ManualClock::new(T0))
        .build();
    store.set(&store.fail_incr, true);
    let app = app(RateLimitState::new(Arc::new(limiter)));

    let response = app
        .oneshot(request("GET", "/api/items", [192, 0, 2, 1]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = json_body(response).await;
    assert_eq!(body["message"], "rate limiter unavailable");
    assert_eq!(body["retryAfter"], 60);
}
