//! Webhook signature verification.
//!
//! The provider signs `id:<data id>;request-id:<x-request-id>;ts:<ts>;` with
//! HMAC-SHA256 and sends `x-signature: ts=<unix seconds>,v1=<hex digest>`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::utils::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const MAX_SIGNATURE_AGE_SECS: i64 = 5 * 60;

pub fn manifest(data_id: &str, request_id: &str, ts: i64) -> String {
    format!("id:{data_id};request-id:{request_id};ts:{ts};")
}

/// Hex HMAC of the manifest. Used by the provider side and by tests.
pub fn sign(secret: &str, data_id: &str, request_id: &str, ts: i64) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalServerError(format!("HMAC key error: {e}")))?;
    mac.update(manifest(data_id, request_id, ts).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn signature_header(secret: &str, data_id: &str, request_id: &str, ts: i64) -> Result<String, AppError> {
    Ok(format!("ts={ts},v1={}", sign(secret, data_id, request_id, ts)?))
}

fn parse_header(header: &str) -> Option<(i64, String)> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = value.trim().parse::<i64>().ok(),
            Some(("v1", value)) => v1 = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Some((ts?, v1?))
}

#[derive(Clone, Debug)]
pub struct WebhookVerifier {
    secret: Option<String>,
    production: bool,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, production: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            production,
        }
    }

    pub fn verify(
        &self,
        signature: Option<&str>,
        request_id: Option<&str>,
        data_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let Some(secret) = &self.secret else {
            if self.production {
                return Err(AppError::InternalServerError(
                    "Webhook secret is not configured".to_string(),
                ));
            }
            tracing::warn!("Webhook secret not configured, accepting unsigned webhook in development");
            return Ok(());
        };

        let signature = signature
            .ok_or_else(|| AppError::AuthError("Missing webhook signature".to_string()))?;
        let request_id = request_id
            .ok_or_else(|| AppError::AuthError("Missing x-request-id header".to_string()))?;
        let (ts, v1) = parse_header(signature)
            .ok_or_else(|| AppError::AuthError("Malformed webhook signature".to_string()))?;

        // ts is unauthenticated until the HMAC is checked
        let age = now.timestamp().checked_sub(ts).and_then(i64::checked_abs);
        if age.map_or(true, |age| age > MAX_SIGNATURE_AGE_SECS) {
            return Err(AppError::AuthError("Webhook signature expired".to_string()));
        }

        let expected = hex::decode(&v1)
            .map_err(|_| AppError::AuthError("Malformed webhook signature".to_string()))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::InternalServerError(format!("HMAC key error: {e}")))?;
        mac.update(manifest(data_id, request_id, ts).as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| AppError::AuthError("Invalid webhook signature".to_string()))
    }
}
