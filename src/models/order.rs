use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ORDER_PENDING: &str = "PENDING";
pub const ORDER_PAID: &str = "PAID";
pub const ORDER_CANCELLED: &str = "CANCELLED";
pub const ORDER_REFUNDED: &str = "REFUNDED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub status: String,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == ORDER_PENDING
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub seat_id: i64,
    pub unit_price_cents: i64,
}

/// Order item joined with its seat, for checkout line descriptions and ticket issuing.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub seat_id: i64,
    pub show_id: i64,
    pub sector: String,
    pub row_label: Option<String>,
    pub seat_number: i32,
    pub unit_price_cents: i64,
}

impl OrderLine {
    pub fn label(&self) -> String {
        format!(
            "{}{}{}",
            self.sector,
            self.row_label.as_deref().unwrap_or(""),
            self.seat_number
        )
    }
}

/// One priced seat of an order about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    pub seat_id: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: i64,
    pub status: &'static str,
    pub total_cents: i64,
    pub seats: Vec<i64>,
    pub fixed_fee_cents: i64,
}
