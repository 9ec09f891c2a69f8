use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use sha2::{Digest, Sha256};

use crate::state::AppState;
use crate::utils::error::AppError;

/// Caller presented `Authorization: Bearer <ADMIN_API_TOKEN>`.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            tracing::warn!("Admin endpoint called but ADMIN_API_TOKEN is not configured");
            return Err(AppError::AuthError("Admin access is not configured".to_string()));
        };

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::AuthError("Missing bearer token".to_string()))?;

        if Sha256::digest(token.as_bytes()) != Sha256::digest(expected.as_bytes()) {
            return Err(AppError::AuthError("Invalid admin token".to_string()));
        }
        Ok(AdminAccess)
    }
}
