//! Storage seams.
//!
//! `InventoryStore` is the durable, transactional source of truth for seats, ticket
//! types, orders and payments. Each method is one transaction; implementations lock
//! the rows they check before writing, and delegate the business decision to the
//! pure rules in `crate::services` so every backend decides identically.
//!
//! `CoordinationStore` is the ephemeral key-value side: TTL keys, conditional set,
//! counters and lists. Nothing it holds is authoritative for money or stock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    GeneratedTicket, NewRefund, Order, OrderLine, OrderReceipt, Payment, PaymentNotification,
    PaymentStatusView, ReservationDetail, Seat, SettlementOutcome, TicketTypeAvailability,
};
use crate::services::reservations::{ReservationReceipt, ReservationRequest};
use crate::utils::error::AppError;

pub mod breaker;
pub mod memory;
pub mod postgres;
pub mod redis_store;

pub use breaker::CircuitBreakerStore;
pub use memory::{MemoryCoordinationStore, MemoryInventoryStore};
pub use postgres::PgInventoryStore;
pub use redis_store::RedisCoordinationStore;

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Claims every seat in `seat_ids` for `buyer_id` until `until`, or none of them.
    async fn hold_seats(
        &self,
        show_id: i64,
        buyer_id: i64,
        seat_ids: &[i64],
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn list_seats(&self, show_id: i64) -> Result<Vec<Seat>, AppError>;

    async fn reserve_ticket_types(
        &self,
        request: &ReservationRequest,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReservationReceipt, AppError>;

    async fn list_ticket_types(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketTypeAvailability>, AppError>;

    async fn get_reservation(&self, id: i64) -> Result<Option<ReservationDetail>, AppError>;

    /// ACTIVE reservations among `ids` whose window has not closed.
    async fn live_reservations(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationDetail>, AppError>;

    async fn reservation_tickets(&self, id: i64) -> Result<Vec<GeneratedTicket>, AppError>;

    /// Flips lapsed ACTIVE reservations to EXPIRED. Returns how many changed.
    async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn create_order(
        &self,
        buyer_id: i64,
        show_id: i64,
        seat_ids: &[i64],
        fixed_fee_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<OrderReceipt, AppError>;

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AppError>;

    async fn order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>, AppError>;

    async fn order_tickets(&self, order_id: i64) -> Result<Vec<GeneratedTicket>, AppError>;

    async fn record_preference(&self, reference: &str, preference_id: &str)
        -> Result<(), AppError>;

    /// Applies one provider notification: ledger upsert plus the business transition.
    async fn settle(
        &self,
        notification: &PaymentNotification,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, AppError>;

    async fn payment_status(&self, order_id: i64)
        -> Result<Option<PaymentStatusView>, AppError>;

    async fn approved_payment(&self, order_id: i64) -> Result<Option<Payment>, AppError>;

    /// Stores a refund; a full refund also marks the order REFUNDED and voids its tickets.
    async fn record_refund(
        &self,
        order_id: i64,
        payment: &Payment,
        refund: &NewRefund,
        full: bool,
    ) -> Result<(), AppError>;
}

/// Admin-managed settings, read fresh on every use.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn fixed_fee_cents(&self) -> Result<i64, AppError>;
}

#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store returned malformed data: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// SET key value NX PX ttl. Returns whether the key was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError>;

    async fn delete(&self, key: &str) -> Result<(), CoordinationError>;

    /// Deletes `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str)
        -> Result<bool, CoordinationError>;

    /// Appends to a list and returns its new length.
    async fn push_back(&self, key: &str, value: &str) -> Result<u64, CoordinationError>;

    async fn pop_front(&self, key: &str) -> Result<Option<String>, CoordinationError>;

    async fn list_len(&self, key: &str) -> Result<u64, CoordinationError>;

    async fn list_all(&self, key: &str) -> Result<Vec<String>, CoordinationError>;

    /// Removes the first occurrence of `value`. Returns how many were removed.
    async fn list_remove(&self, key: &str, value: &str) -> Result<u64, CoordinationError>;

    /// Keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError>;

    /// Increments a counter and returns the new value. The TTL starts when the
    /// counter is created and is not extended by later increments.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CoordinationError>;

    /// Decrements a counter that still exists. A missing counter stays missing and
    /// reads as 0.
    async fn decr_if_present(&self, key: &str) -> Result<i64, CoordinationError>;
}
