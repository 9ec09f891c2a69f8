//! Ticket QR payloads: base64 of a small JSON claims document.
//!
//! The payload is opaque to the holder; gates decode it and check `nbf`/`exp`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::utils::error::AppError;

const SEAT_TICKET_VALIDITY_HOURS: i64 = 24;
const RESERVATION_TICKET_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatTicketClaims {
    pub order_id: i64,
    pub seat_id: i64,
    pub show_id: i64,
    pub payment_id: String,
    pub nbf: i64,
    pub exp: i64,
}

impl SeatTicketClaims {
    pub fn new(order_id: i64, seat_id: i64, show_id: i64, payment_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            seat_id,
            show_id,
            payment_id: payment_id.to_string(),
            nbf: now.timestamp(),
            exp: (now + Duration::hours(SEAT_TICKET_VALIDITY_HOURS)).timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationTicketClaims {
    pub reservation_id: i64,
    pub ticket_type_id: i64,
    pub event_id: i64,
    pub payment_id: String,
    pub ticket_number: String,
    pub customer_email: String,
    pub nbf: i64,
    pub exp: i64,
}

impl ReservationTicketClaims {
    pub fn new(
        reservation_id: i64,
        ticket_type_id: i64,
        event_id: i64,
        payment_id: &str,
        ticket_number: String,
        customer_email: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id,
            ticket_type_id,
            event_id,
            payment_id: payment_id.to_string(),
            ticket_number,
            customer_email: customer_email.to_string(),
            nbf: now.timestamp(),
            exp: (now + Duration::days(RESERVATION_TICKET_VALIDITY_DAYS)).timestamp(),
        }
    }
}

/// Unit numbers are 1-based within a reservation, so the pair is unique.
pub fn reservation_ticket_number(ticket_type_id: i64, reservation_id: i64, unit: i32) -> String {
    format!("{ticket_type_id}-{reservation_id}-{unit}")
}

pub fn encode<T: Serialize>(claims: &T) -> Result<String, AppError> {
    let json = serde_json::to_vec(claims)
        .map_err(|e| AppError::InternalServerError(format!("QR payload serialization failed: {e}")))?;
    Ok(STANDARD.encode(json))
}

pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, AppError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| AppError::ValidationError("QR payload is not valid base64".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| AppError::ValidationError("QR payload is not a ticket".to_string()))
}
