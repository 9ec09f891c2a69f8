mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use boxoffice_server::models::TicketType;
use boxoffice_server::services::reservations::ReservationRequest;
use common::{error_code, TestApp};

fn reserve_body(event_id: i64, type_id: i64, quantity: i32) -> Value {
    json!({
        "eventId": event_id,
        "tickets": [{ "typeId": type_id, "quantity": quantity }],
        "customerInfo": { "name": "Ana Perez", "email": "ana@example.com" }
    })
}

fn request(event_id: i64, type_id: i64, quantity: i32) -> ReservationRequest {
    serde_json::from_value(reserve_body(event_id, type_id, quantity)).unwrap()
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let app = TestApp::new();
    let ga = app.seed_ticket_type(1, "GA", 10, 5000).await;

    let first = app.state.reservations.clone();
    let second = app.state.reservations.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.create_reservation(&request(1, ga, 6), Utc::now()).await }),
        tokio::spawn(async move { second.create_reservation(&request(1, ga, 6), Utc::now()).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.code(), "INSUFFICIENT_STOCK");

    let (_, body) = app.get("/api/events/1/ticket-types").await;
    assert_eq!(body["data"][0]["available"], 4);
    assert_eq!(body["data"][0]["quantityReserved"], 6);
}

#[tokio::test]
async fn many_small_reservations_stop_at_capacity() {
    let app = TestApp::new();
    let ga = app.seed_ticket_type(1, "GA", 10, 5000).await;

    let mut tasks = Vec::new();
    for _ in 0..25 {
        let engine = app.state.reservations.clone();
        tasks.push(tokio::spawn(async move {
            engine.create_reservation(&request(1, ga, 1), Utc::now()).await
        }));
    }
    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            granted += 1;
        }
    }
    assert_eq!(granted, 10);
}

#[tokio::test]
async fn reserve_returns_ids_and_total() {
    let app = TestApp::new();
    let ga = app.seed_ticket_type(1, "GA", 10, 5000).await;
    let vip = app.seed_ticket_type(1, "VIP", 5, 12000).await;

    let body = json!({
        "eventId": 1,
        "tickets": [{ "typeId": ga, "quantity": 2 }, { "typeId": vip, "quantity": 1 }],
        "customerInfo": { "name": "Ana Perez", "email": "ana@example.com", "phone": "555-0101" }
    });
    let (status, body) = app.post("/api/tickets/reserve", body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["reservationIds"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["totalAmount"], 22000);

    let reservation_id = body["data"]["reservationIds"][0].as_i64().unwrap();
    let (status, body) = app
        .get(&format!("/api/tickets/reservations/{reservation_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ACTIVE");
    assert_eq!(body["data"]["ticketTypeName"], "GA");
    assert_eq!(body["data"]["totalCents"], 10000);
    assert_eq!(body["data"]["isExpired"], false);
}

#[tokio::test]
async fn failing_line_reserves_nothing() {
    let app = TestApp::new();
    let ga = app.seed_ticket_type(1, "GA", 10, 5000).await;
    let vip = app.seed_ticket_type(1, "VIP", 1, 12000).await;

    let body = json!({
        "eventId": 1,
        "tickets": [{ "typeId": ga, "quantity": 2 }, { "typeId": vip, "quantity": 2 }],
        "customerInfo": { "name": "Ana Perez", "email": "ana@example.com" }
    });
    let (status, body) = app.post("/api/tickets/reserve", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "INSUFFICIENT_STOCK");
    assert_eq!(body["error"]["details"]["available"], 1);

    let (_, body) = app.get("/api/events/1/ticket-types").await;
    assert_eq!(body["data"][0]["available"], 10);
}

#[tokio::test]
async fn closed_sale_window_is_not_on_sale() {
    let app = TestApp::new();
    let early = app
        .inventory
        .insert_ticket_type(TicketType {
            id: 0,
            event_id: 1,
            name: "Early bird".to_string(),
            description: None,
            price_cents: 3000,
            quantity_total: 10,
            quantity_sold: 0,
            sale_start: None,
            sale_end: Some(Utc::now() - Duration::days(1)),
            is_active: true,
        })
        .await;

    let (status, body) = app.post("/api/tickets/reserve", reserve_body(1, early, 1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "TICKET_NOT_ON_SALE");
}

#[tokio::test]
async fn unknown_or_foreign_ticket_type_is_not_found() {
    let app = TestApp::new();
    let other_event = app.seed_ticket_type(2, "GA", 10, 5000).await;

    let (status, body) = app
        .post("/api/tickets/reserve", reserve_body(1, other_event, 1))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "TICKET_TYPE_NOT_FOUND");
}

#[tokio::test]
async fn invalid_quantity_or_customer_is_rejected() {
    let app = TestApp::new();
    let ga = app.seed_ticket_type(1, "GA", 50, 5000).await;

    let (status, _) = app.post("/api/tickets/reserve", reserve_body(1, ga, 11)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({
        "eventId": 1,
        "tickets": [{ "typeId": ga, "quantity": 1 }],
        "customerInfo": { "name": "A", "email": "not-an-email" }
    });
    let (status, body) = app.post("/api/tickets/reserve", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn lapsed_reservation_stops_counting_against_stock() {
    let app = TestApp::new();
    let ga = app.seed_ticket_type(1, "GA", 10, 5000).await;

    let past = Utc::now() - Duration::minutes(30);
    let receipt = app
        .state
        .reservations
        .create_reservation(&request(1, ga, 10), past)
        .await
        .unwrap();

    let (_, body) = app.get("/api/events/1/ticket-types").await;
    assert_eq!(body["data"][0]["available"], 10);

    let (status, _) = app.post("/api/tickets/reserve", reserve_body(1, ga, 10)).await;
    assert_eq!(status, StatusCode::CREATED);

    let expired = app.state.reservations.expire_lapsed(Utc::now()).await.unwrap();
    assert_eq!(expired, 1);
    let lapsed = app
        .inventory
        .reservation(receipt.reservation_ids[0])
        .await
        .unwrap();
    assert_eq!(lapsed.status, "EXPIRED");
}

#[tokio::test]
async fn missing_reservation_is_not_found() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/tickets/reservations/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "RESERVATION_NOT_FOUND");
}
