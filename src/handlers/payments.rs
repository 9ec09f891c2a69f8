use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::handlers::admin::AdminAccess;
use crate::handlers::{json_body, parse_body};
use crate::services::idempotency::request_key;
use crate::services::payment_provider::{BackUrls, Payer};
use crate::services::settlement::WebhookEvent;
use crate::services::IdempotencyScope;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{success, StoredResponse};

const SIGNATURE_HEADER: &str = "x-signature";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPreferenceRequest {
    pub order_id: i64,
    pub payer: Payer,
    pub back_urls: BackUrls,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPreferenceRequest {
    pub reservation_ids: Vec<i64>,
    pub payer: Payer,
    pub back_urls: BackUrls,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
}

pub async fn create_order_preference(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StoredResponse, AppError> {
    let body = json_body(payload)?;
    let request: OrderPreferenceRequest = parse_body(&body)?;
    let key = request_key(&headers, &method, uri.path(), &body, None);

    state
        .idempotency
        .replay_or_run(IdempotencyScope::Payment, &key, || async {
            let receipt = state
                .payments
                .create_order_preference(request.order_id, request.payer, request.back_urls)
                .await?;
            Ok(StoredResponse::new(
                StatusCode::CREATED,
                receipt,
                "Payment preference created",
            ))
        })
        .await
}

pub async fn create_reservation_preference(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StoredResponse, AppError> {
    let body = json_body(payload)?;
    let request: ReservationPreferenceRequest = parse_body(&body)?;
    let key = request_key(&headers, &method, uri.path(), &body, None);

    state
        .idempotency
        .replay_or_run(IdempotencyScope::Payment, &key, || async {
            let receipt = state
                .payments
                .create_reservation_preference(
                    &request.reservation_ids,
                    request.payer,
                    request.back_urls,
                    Utc::now(),
                )
                .await?;
            Ok(StoredResponse::new(
                StatusCode::CREATED,
                receipt,
                "Payment preference created",
            ))
        })
        .await
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Response, AppError> {
    let status = state.payments.payment_status(order_id).await?;
    Ok(success(status, "Payment status retrieved").into_response())
}

pub async fn refund(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    payload: Option<Json<RefundRequest>>,
) -> Result<Response, AppError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let receipt = state
        .payments
        .refund(order_id, request.amount_cents, request.reason)
        .await?;
    Ok(success(receipt, "Refund processed").into_response())
}

/// Provider notifications. The signature covers the notified resource id, taken
/// from the `data.id` query parameter or, failing that, the body.
pub async fn webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(payload)?;
    let event: WebhookEvent = parse_body(&body)?;

    let data_id = query
        .data_id
        .or_else(|| {
            event.data.as_ref().map(|data| match &data.id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            })
        })
        .unwrap_or_default();
    let signature = header_str(&headers, SIGNATURE_HEADER);
    let request_id = header_str(&headers, REQUEST_ID_HEADER);

    if let Err(e) = state.verifier.verify(signature, request_id, &data_id, Utc::now()) {
        tracing::warn!(request_id = ?request_id, error = %e, "Rejected webhook delivery");
        return Err(e);
    }

    let ack = state
        .settlement
        .process_webhook(&event, request_id, Utc::now())
        .await?;
    Ok(success(ack, "Webhook received").into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
