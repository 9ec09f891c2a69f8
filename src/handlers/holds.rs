use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::handlers::{json_body, parse_body};
use crate::services::idempotency::request_key;
use crate::services::IdempotencyScope;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{success, StoredResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHoldRequest {
    pub user_id: i64,
    pub seats: Vec<i64>,
    #[serde(default)]
    pub minutes: Option<i64>,
    #[serde(default)]
    pub access_token: Option<String>,
}

pub async fn create_hold(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StoredResponse, AppError> {
    let body = json_body(payload)?;
    let request: CreateHoldRequest = parse_body(&body)?;
    let key = request_key(&headers, &method, uri.path(), &body, Some(request.user_id));

    state
        .idempotency
        .replay_or_run(IdempotencyScope::Reservation, &key, || async {
            state
                .queue
                .require_access(show_id, request.user_id, request.access_token.as_deref())
                .await?;
            let receipt = state
                .holds
                .create_hold(
                    show_id,
                    request.user_id,
                    &request.seats,
                    request.minutes,
                    Utc::now(),
                )
                .await?;
            Ok(StoredResponse::new(StatusCode::OK, receipt, "Seats held"))
        })
        .await
}

pub async fn seat_map(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
) -> Result<Response, AppError> {
    let seats = state.holds.seat_map(show_id, Utc::now()).await?;
    Ok(success(seats, "Seat map retrieved").into_response())
}
