use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod admin;
pub mod holds;
pub mod orders;
pub mod payments;
pub mod queue;
pub mod rate_limit;
pub mod reservations;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "boxoffice-api",
    };

    success(payload, "Health check successful").into_response()
}

/// Raw JSON body. Idempotent handlers fingerprint it before parsing.
pub(crate) fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &Value) -> Result<T, AppError> {
    serde_json::from_value(body.clone())
        .map_err(|e| AppError::ValidationError(format!("Invalid request body: {e}")))
}
