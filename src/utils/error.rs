use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::store::CoordinationError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Order {0} not found")]
    OrderNotFound(i64),

    #[error("Reservation {0} not found")]
    ReservationNotFound(i64),

    #[error("No active reservations found")]
    ReservationsNotFound,

    #[error("No approved payment found for order {0}")]
    PaymentNotFound(i64),

    #[error("One or more seats do not exist for this show")]
    SeatsNotFound,

    #[error("Seat {seat_id} is already held or sold")]
    SeatAlreadyHeldOrSold { seat_id: i64 },

    #[error("Seat {seat_id} is already sold")]
    SeatAlreadySold { seat_id: i64 },

    #[error("Hold for seat {seat_id} is missing or expired")]
    HoldMissingOrExpired { seat_id: i64 },

    #[error("One or more ticket types were not found")]
    TicketTypeNotFound,

    #[error("Ticket type \"{ticket_type}\" is not on sale")]
    TicketNotOnSale { ticket_type: String },

    #[error("Not enough \"{ticket_type}\" tickets available (available: {available})")]
    InsufficientStock { ticket_type: String, available: i64 },

    #[error("Resource temporarily locked, try again")]
    ResourceLocked,

    #[error("The queue is full, try again later")]
    QueueFull,

    #[error("User is already in a queue")]
    UserAlreadyInQueue,

    #[error("User is not in the queue")]
    NotInQueue,

    #[error("There are no users in the queue")]
    QueueEmpty,

    #[error("This show requires access through the virtual queue")]
    QueueAccessRequired,

    #[error("Queue access token is invalid or expired")]
    QueueAccessDenied,

    #[error("Too many requests, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service temporarily unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error")]
    DatabaseError(sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Webhook processing failed: {0}")]
    WebhookProcessingFailed(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::TicketNotOnSale { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::QueueAccessRequired | AppError::QueueAccessDenied => StatusCode::FORBIDDEN,
            AppError::OrderNotFound(_)
            | AppError::ReservationNotFound(_)
            | AppError::ReservationsNotFound
            | AppError::PaymentNotFound(_)
            | AppError::SeatsNotFound
            | AppError::TicketTypeNotFound
            | AppError::NotInQueue
            | AppError::QueueEmpty => StatusCode::NOT_FOUND,
            AppError::SeatAlreadyHeldOrSold { .. }
            | AppError::SeatAlreadySold { .. }
            | AppError::HoldMissingOrExpired { .. }
            | AppError::InsufficientStock { .. }
            | AppError::ResourceLocked
            | AppError::UserAlreadyInQueue => StatusCode::CONFLICT,
            AppError::QueueFull | AppError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_)
            | AppError::WebhookProcessingFailed(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "UNAUTHORIZED",
            AppError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            AppError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            AppError::ReservationsNotFound => "RESERVATIONS_NOT_FOUND",
            AppError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            AppError::SeatsNotFound => "SEATS_NOT_FOUND",
            AppError::SeatAlreadyHeldOrSold { .. } => "SEAT_ALREADY_HELD_OR_SOLD",
            AppError::SeatAlreadySold { .. } => "SEAT_ALREADY_SOLD",
            AppError::HoldMissingOrExpired { .. } => "HOLD_MISSING_OR_EXPIRED",
            AppError::TicketTypeNotFound => "TICKET_TYPE_NOT_FOUND",
            AppError::TicketNotOnSale { .. } => "TICKET_NOT_ON_SALE",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::ResourceLocked => "RESOURCE_LOCKED",
            AppError::QueueFull => "QUEUE_FULL",
            AppError::UserAlreadyInQueue => "USER_ALREADY_IN_QUEUE",
            AppError::NotInQueue => "NOT_IN_QUEUE",
            AppError::QueueEmpty => "QUEUE_EMPTY",
            AppError::QueueAccessRequired => "QUEUE_ACCESS_REQUIRED",
            AppError::QueueAccessDenied => "QUEUE_ACCESS_DENIED",
            AppError::RateLimited { .. } => "TOO_MANY_REQUESTS",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::WebhookProcessingFailed(_) => "WEBHOOK_PROCESSING_FAILED",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Structured fields a caller can act on without parsing the message.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::InsufficientStock {
                ticket_type,
                available,
            } => Some(json!({ "ticketType": ticket_type, "available": available })),
            AppError::SeatAlreadyHeldOrSold { seat_id }
            | AppError::SeatAlreadySold { seat_id }
            | AppError::HoldMissingOrExpired { seat_id } => Some(json!({ "seatId": seat_id })),
            AppError::RateLimited { retry_after_secs } => {
                Some(json!({ "retryAfter": retry_after_secs }))
            }
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            _ if self.status_code().is_server_error() => {
                error!(code = self.code(), error = %self, "Application error");
            }
            _ => {
                warn!(code = self.code(), error = %self, "Request rejected");
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let unreachable = matches!(
            err,
            sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
        );
        if unreachable {
            AppError::ServiceUnavailable(format!("database unreachable: {err}"))
        } else {
            AppError::DatabaseError(err)
        }
    }
}

impl From<CoordinationError> for AppError {
    fn from(err: CoordinationError) -> Self {
        AppError::ServiceUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            AppError::ServiceUnavailable(_) => {
                "Service temporarily unavailable, try again later".to_string()
            }
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::WebhookProcessingFailed(msg) => msg.clone(),
            other => other.to_string(),
        };

        let mut response = error_response(code, public_message, self.details(), status);
        if let AppError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
