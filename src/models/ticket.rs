use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const RESERVATION_ACTIVE: &str = "ACTIVE";
pub const RESERVATION_PURCHASED: &str = "PURCHASED";
pub const RESERVATION_CANCELLED: &str = "CANCELLED";
pub const RESERVATION_EXPIRED: &str = "EXPIRED";

pub const TICKET_ISSUED: &str = "ISSUED";
pub const TICKET_CANCELLED: &str = "CANCELLED";

/// Remaining stock at or below this share of the total is reported as low.
const LOW_STOCK_RATIO_PERCENT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub quantity_total: i32,
    pub quantity_sold: i32,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl TicketType {
    /// Missing bounds leave that side of the window open.
    pub fn sale_window_open(&self, now: DateTime<Utc>) -> bool {
        if self.sale_start.is_some_and(|start| now < start) {
            return false;
        }
        if self.sale_end.is_some_and(|end| now > end) {
            return false;
        }
        true
    }

    /// `reserved` is the live sum of ACTIVE, unexpired reservation quantities.
    pub fn available(&self, reserved: i64) -> i64 {
        (i64::from(self.quantity_total) - i64::from(self.quantity_sold) - reserved).max(0)
    }

    pub fn availability_label(&self, reserved: i64, now: DateTime<Utc>) -> &'static str {
        if !self.is_active {
            return "inactive";
        }
        if self.sale_start.is_some_and(|start| now < start) {
            return "not_started";
        }
        if self.sale_end.is_some_and(|end| now > end) {
            return "ended";
        }
        let available = self.available(reserved);
        if available == 0 {
            "sold_out"
        } else if available * 100 <= i64::from(self.quantity_total) * LOW_STOCK_RATIO_PERCENT {
            "low_stock"
        } else {
            "available"
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTypeAvailability {
    #[serde(flatten)]
    pub ticket_type: TicketType,
    pub quantity_reserved: i64,
    pub available: i64,
    pub is_on_sale: bool,
    pub availability: &'static str,
}

impl TicketTypeAvailability {
    pub fn at(ticket_type: TicketType, reserved: i64, now: DateTime<Utc>) -> Self {
        let available = ticket_type.available(reserved);
        let is_on_sale = ticket_type.is_active && ticket_type.sale_window_open(now) && available > 0;
        let availability = ticket_type.availability_label(reserved, now);
        Self {
            ticket_type,
            quantity_reserved: reserved,
            available,
            is_on_sale,
            availability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketReservation {
    pub id: i64,
    pub ticket_type_id: i64,
    pub quantity: i32,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TicketReservation {
    /// Counts against stock only while ACTIVE and inside its window.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RESERVATION_ACTIVE && self.expires_at > now
    }
}

/// Reservation joined with its ticket type and event.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub reservation: TicketReservation,
    pub event_id: i64,
    pub ticket_type_name: String,
    pub price_cents: i64,
}

impl ReservationDetail {
    pub fn total_cents(&self) -> i64 {
        self.price_cents * i64::from(self.reservation.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTicket {
    pub id: i64,
    pub order_id: Option<i64>,
    pub seat_id: Option<i64>,
    pub reservation_id: Option<i64>,
    pub ticket_type_id: Option<i64>,
    pub ticket_number: Option<String>,
    pub qr_payload: String,
    pub status: String,
    pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn general_admission() -> TicketType {
        TicketType {
            id: 1,
            event_id: 1,
            name: "GA".into(),
            description: None,
            price_cents: 5000,
            quantity_total: 10,
            quantity_sold: 0,
            sale_start: None,
            sale_end: None,
            is_active: true,
        }
    }

    #[test]
    fn available_subtracts_sold_and_live_reservations() {
        let mut tt = general_admission();
        tt.quantity_sold = 3;
        assert_eq!(tt.available(2), 5);
        assert_eq!(tt.available(20), 0);
    }

    #[test]
    fn sale_window_bounds_are_optional() {
        let now = Utc::now();
        let mut tt = general_admission();
        assert!(tt.sale_window_open(now));

        tt.sale_start = Some(now + Duration::hours(1));
        assert!(!tt.sale_window_open(now));
        assert_eq!(tt.availability_label(0, now), "not_started");

        tt.sale_start = None;
        tt.sale_end = Some(now - Duration::hours(1));
        assert!(!tt.sale_window_open(now));
        assert_eq!(tt.availability_label(0, now), "ended");
    }

    #[test]
    fn availability_labels() {
        let now = Utc::now();
        let tt = general_admission();
        assert_eq!(tt.availability_label(0, now), "available");
        assert_eq!(tt.availability_label(9, now), "low_stock");
        assert_eq!(tt.availability_label(10, now), "sold_out");
    }
}
