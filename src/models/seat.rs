use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const SEAT_AVAILABLE: &str = "AVAILABLE";
pub const SEAT_SOLD: &str = "SOLD";

/// Status as observed at a given instant. `Held` is never stored; it is derived
/// from `reserved_until` on an available seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveSeatStatus {
    Available,
    Held,
    Sold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: i64,
    pub show_id: i64,
    pub sector: String,
    pub row_label: Option<String>,
    pub seat_number: i32,
    pub status: String,
    pub reserved_by: Option<i64>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub price_tier_id: Option<i64>,
}

impl Seat {
    pub fn is_sold(&self) -> bool {
        self.status != SEAT_AVAILABLE
    }

    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_sold() && self.reserved_until.is_some_and(|until| until > now)
    }

    /// A lapsed hold counts as free; nothing clears it eagerly.
    pub fn is_free_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_sold() && !self.is_held_at(now)
    }

    pub fn is_held_by(&self, buyer_id: i64, now: DateTime<Utc>) -> bool {
        self.is_held_at(now) && self.reserved_by == Some(buyer_id)
    }

    /// Whether an order of `buyer_id` may still turn this seat into a sale: unsold,
    /// and either held by the buyer or not held by anyone else.
    pub fn is_claimable_by(&self, buyer_id: i64, now: DateTime<Utc>) -> bool {
        !self.is_sold() && (self.reserved_by == Some(buyer_id) || !self.is_held_at(now))
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveSeatStatus {
        if self.is_sold() {
            EffectiveSeatStatus::Sold
        } else if self.is_held_at(now) {
            EffectiveSeatStatus::Held
        } else {
            EffectiveSeatStatus::Available
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{}{}{}",
            self.sector,
            self.row_label.as_deref().unwrap_or(""),
            self.seat_number
        )
    }
}

/// Seat row joined with its tier's base price.
#[derive(Debug, Clone, FromRow)]
pub struct PricedSeat {
    #[sqlx(flatten)]
    pub seat: Seat,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PriceTier {
    pub id: i64,
    pub show_id: i64,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub id: i64,
    pub sector: String,
    pub row_label: Option<String>,
    pub seat_number: i32,
    pub status: EffectiveSeatStatus,
    pub held_until: Option<DateTime<Utc>>,
}

impl SeatView {
    pub fn at(seat: &Seat, now: DateTime<Utc>) -> Self {
        let status = seat.effective_status(now);
        Self {
            id: seat.id,
            sector: seat.sector.clone(),
            row_label: seat.row_label.clone(),
            seat_number: seat.seat_number,
            status,
            held_until: match status {
                EffectiveSeatStatus::Held => seat.reserved_until,
                _ => None,
            },
        }
    }
}
