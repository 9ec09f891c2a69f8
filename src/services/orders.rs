use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{GeneratedTicket, Order, OrderLine, OrderReceipt, PricedLine, PricedSeat};
use crate::services::holds::normalize_seat_ids;
use crate::services::lock::{LockKey, LockManager};
use crate::store::{InventoryStore, SettingsProvider};
use crate::utils::error::AppError;

/// Prices the locked seats of a hold. Checks run in order: existence, sold, then
/// hold ownership and freshness.
pub fn price_order(
    seats: &[PricedSeat],
    requested: &[i64],
    buyer_id: i64,
    fixed_fee_cents: i64,
    now: DateTime<Utc>,
) -> Result<Vec<PricedLine>, AppError> {
    if seats.len() != requested.len() {
        return Err(AppError::SeatsNotFound);
    }
    if let Some(sold) = seats.iter().find(|priced| priced.seat.is_sold()) {
        return Err(AppError::SeatAlreadySold {
            seat_id: sold.seat.id,
        });
    }
    if let Some(unheld) = seats
        .iter()
        .find(|priced| !priced.seat.is_held_by(buyer_id, now))
    {
        return Err(AppError::HoldMissingOrExpired {
            seat_id: unheld.seat.id,
        });
    }

    Ok(seats
        .iter()
        .map(|priced| PricedLine {
            seat_id: priced.seat.id,
            unit_price_cents: priced.price_cents + fixed_fee_cents,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderLine>,
    pub tickets: Vec<GeneratedTicket>,
}

#[derive(Clone)]
pub struct OrderEngine {
    store: Arc<dyn InventoryStore>,
    settings: Arc<dyn SettingsProvider>,
    locks: LockManager,
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        settings: Arc<dyn SettingsProvider>,
        locks: LockManager,
    ) -> Self {
        Self {
            store,
            settings,
            locks,
        }
    }

    pub async fn create_order(
        &self,
        buyer_id: i64,
        show_id: i64,
        seat_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<OrderReceipt, AppError> {
        let seats = normalize_seat_ids(seat_ids)?;
        let fixed_fee_cents = self.settings.fixed_fee_cents().await?;

        let store = &self.store;
        let receipt = self
            .locks
            .run_locked(&LockKey::seats(show_id, &seats), || async {
                store
                    .create_order(buyer_id, show_id, &seats, fixed_fee_cents, now)
                    .await
            })
            .await?;

        tracing::info!(
            order_id = receipt.order_id,
            buyer_id,
            show_id,
            total_cents = receipt.total_cents,
            "Order created"
        );
        Ok(receipt)
    }

    pub async fn order(&self, order_id: i64) -> Result<OrderView, AppError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(AppError::OrderNotFound(order_id))?;
        let items = self.store.order_lines(order_id).await?;
        let tickets = self.store.order_tickets(order_id).await?;
        Ok(OrderView {
            order,
            items,
            tickets,
        })
    }
}
