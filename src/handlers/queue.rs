use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handlers::admin::AdminAccess;
use crate::handlers::{json_body, parse_body};
use crate::services::idempotency::request_key;
use crate::services::IdempotencyScope;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{success, StoredResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessRequest {
    pub user_id: i64,
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RequiredRequest {
    pub required: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessVerified {
    has_access: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaveResult {
    show_id: i64,
    user_id: i64,
    removed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequiredResult {
    show_id: i64,
    queue_required: bool,
}

pub async fn join(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StoredResponse, AppError> {
    let body = json_body(payload)?;
    let request: JoinRequest = parse_body(&body)?;
    let key = request_key(&headers, &method, uri.path(), &body, Some(request.user_id));

    state
        .idempotency
        .replay_or_run(IdempotencyScope::Queue, &key, || async {
            let receipt = state.queue.join(show_id, request.user_id, Utc::now()).await?;
            Ok(StoredResponse::new(StatusCode::CREATED, receipt, "Joined the queue"))
        })
        .await
}

pub async fn position(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Response, AppError> {
    let position = state.queue.position(show_id, query.user_id).await?;
    Ok(success(position, "Queue position retrieved").into_response())
}

pub async fn process_next(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
) -> Result<Response, AppError> {
    let admission = state.queue.process_next(show_id, Utc::now()).await?;
    Ok(success(admission, "User admitted from the queue").into_response())
}

pub async fn verify_access(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let request: VerifyAccessRequest = parse_body(&json_body(payload)?)?;
    if !state
        .queue
        .verify_access(show_id, request.user_id, &request.access_token)
        .await?
    {
        return Err(AppError::QueueAccessDenied);
    }
    Ok(success(AccessVerified { has_access: true }, "Access verified").into_response())
}

pub async fn leave(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Response, AppError> {
    let removed = state.queue.leave(show_id, query.user_id).await?;
    let result = LeaveResult {
        show_id,
        user_id: query.user_id,
        removed,
    };
    Ok(success(result, "Left the queue").into_response())
}

pub async fn status(
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
) -> Result<Response, AppError> {
    let status = state.queue.status(show_id).await?;
    Ok(success(status, "Queue status retrieved").into_response())
}

pub async fn set_required(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(show_id): Path<i64>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let request: RequiredRequest = parse_body(&json_body(payload)?)?;
    state.queue.set_required(show_id, request.required).await?;
    let result = RequiredResult {
        show_id,
        queue_required: request.required,
    };
    Ok(success(result, "Queue requirement updated").into_response())
}
