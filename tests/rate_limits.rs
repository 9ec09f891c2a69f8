mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use boxoffice_server::config::RateLimitConfig;
use common::{error_code, generous_rate_limits, test_config, TestApp};

fn app_with(limits: RateLimitConfig) -> TestApp {
    let mut config = test_config();
    config.rate_limits = limits;
    TestApp::with_config(config)
}

/// Sends `body` as `client` and returns status, `Retry-After` and JSON body.
async fn send_as(
    app: &TestApp,
    client: &str,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, retry_after, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn failed_purchases_are_limited_per_client() {
    let app = app_with(RateLimitConfig {
        purchase: 2,
        ..generous_rate_limits()
    });
    app.seed_seats(1, 1, 1000).await;
    let missing_seat = json!({ "userId": 10, "seats": [9999] });

    for _ in 0..2 {
        let (status, _, _) = send_as(&app, "203.0.113.1", Method::POST, "/api/shows/1/holds", Some(missing_seat.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    let (status, retry_after, body) =
        send_as(&app, "203.0.113.1", Method::POST, "/api/shows/1/holds", Some(missing_seat.clone())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "TOO_MANY_REQUESTS");
    assert_eq!(body["error"]["details"]["retryAfter"], 60);
    assert_eq!(retry_after.as_deref(), Some("60"));

    // the budget is shared across the purchase routes
    let (status, _, _) = send_as(&app, "203.0.113.1", Method::POST, "/api/orders", Some(json!({ "userId": 10, "seats": [9999] }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _, _) = send_as(&app, "198.51.100.9", Method::POST, "/api/shows/1/holds", Some(missing_seat)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn successful_purchases_are_not_counted() {
    let app = app_with(RateLimitConfig {
        purchase: 2,
        ..generous_rate_limits()
    });
    let seats = app.seed_seats(1, 4, 1000).await;

    for seat in &seats {
        let (status, _, _) = send_as(&app, "203.0.113.1", Method::POST, "/api/shows/1/holds", Some(json!({ "userId": 10, "seats": [seat] }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    // the failure budget is still whole
    for expected in [StatusCode::CONFLICT, StatusCode::CONFLICT, StatusCode::TOO_MANY_REQUESTS] {
        let (status, _, _) = send_as(&app, "203.0.113.1", Method::POST, "/api/shows/1/holds", Some(json!({ "userId": 20, "seats": [seats[0]] }))).await;
        assert_eq!(status, expected);
    }
}

#[tokio::test]
async fn refunds_use_the_strict_budget() {
    let app = app_with(RateLimitConfig {
        strict: 1,
        ..generous_rate_limits()
    });

    let (status, _) = app
        .admin(Method::POST, "/api/payments/refund/404", Some(json!({ "reason": "duplicate" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .admin(Method::POST, "/api/payments/refund/404", Some(json!({ "reason": "duplicate" })))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "TOO_MANY_REQUESTS");

    // other routes are unaffected
    let (status, _) = app.get("/api/shows/1/seats").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_deliveries_are_limited() {
    let app = app_with(RateLimitConfig {
        webhook: 1,
        ..generous_rate_limits()
    });
    app.provider.set_payment("pay-1", "pending", "order:1", 1000);

    let (status, _) = app.deliver_webhook("pay-1", "req-1").await;
    assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, body) = app.deliver_webhook("pay-1", "req-2").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "TOO_MANY_REQUESTS");
}

#[tokio::test]
async fn general_budget_covers_every_api_route() {
    let app = app_with(RateLimitConfig {
        general: 2,
        ..generous_rate_limits()
    });

    for _ in 0..2 {
        let (status, _, _) = send_as(&app, "203.0.113.1", Method::GET, "/api/shows/1/seats", None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _, body) = send_as(&app, "203.0.113.1", Method::GET, "/api/events/1/ticket-types", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["details"]["retryAfter"], 900);

    // the root health check sits outside /api
    let (status, _, _) = send_as(&app, "203.0.113.1", Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn limits_are_skipped_while_coordination_is_down() {
    let app = app_with(RateLimitConfig {
        general: 1,
        ..generous_rate_limits()
    });
    app.seed_seats(1, 1, 1000).await;
    app.coordination.set_available(false);

    for _ in 0..3 {
        let (status, _, _) = send_as(&app, "203.0.113.1", Method::GET, "/api/shows/1/seats", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
