use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::Value;

use crate::handlers::{json_body, parse_body};
use crate::services::idempotency::request_key;
use crate::services::reservations::ReservationRequest;
use crate::services::IdempotencyScope;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{success, StoredResponse};

pub async fn reserve_tickets(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StoredResponse, AppError> {
    let body = json_body(payload)?;
    let request: ReservationRequest = parse_body(&body)?;
    let key = request_key(&headers, &method, uri.path(), &body, None);

    state
        .idempotency
        .replay_or_run(IdempotencyScope::Reservation, &key, || async {
            let receipt = state
                .reservations
                .create_reservation(&request, Utc::now())
                .await?;
            Ok(StoredResponse::new(
                StatusCode::CREATED,
                receipt,
                "Tickets reserved",
            ))
        })
        .await
}

pub async fn ticket_types(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> Result<Response, AppError> {
    let ticket_types = state.reservations.ticket_types(event_id, Utc::now()).await?;
    Ok(success(ticket_types, "Ticket types retrieved").into_response())
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<i64>,
) -> Result<Response, AppError> {
    let reservation = state
        .reservations
        .reservation(reservation_id, Utc::now())
        .await?;
    Ok(success(reservation, "Reservation retrieved").into_response())
}
