//! Quantity reservations on fungible ticket types.
//!
//! Stock is never stored as a reserved counter. Availability is always
//! `total - sold - live reservations`, where a reservation is live while ACTIVE and
//! inside its window, so a lapsed reservation stops counting the instant it expires.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GeneratedTicket, ReservationDetail, TicketType, TicketTypeAvailability};
use crate::services::lock::{LockKey, LockManager};
use crate::store::InventoryStore;
use crate::utils::error::AppError;

pub const RESERVATION_WINDOW_MINUTES: i64 = 15;

const MAX_QUANTITY_PER_LINE: i32 = 10;
const CUSTOMER_NAME_MIN: usize = 2;
const CUSTOMER_NAME_MAX: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationLine {
    pub type_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub event_id: i64,
    pub tickets: Vec<ReservationLine>,
    pub customer_info: CustomerInfo,
}

impl ReservationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.tickets.is_empty() {
            return Err(AppError::ValidationError(
                "At least one ticket line is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for line in &self.tickets {
            if !(1..=MAX_QUANTITY_PER_LINE).contains(&line.quantity) {
                return Err(AppError::ValidationError(format!(
                    "Quantity must be between 1 and {MAX_QUANTITY_PER_LINE}"
                )));
            }
            if !seen.insert(line.type_id) {
                return Err(AppError::ValidationError(format!(
                    "Ticket type {} appears more than once",
                    line.type_id
                )));
            }
        }

        let name_len = self.customer_info.name.trim().chars().count();
        if !(CUSTOMER_NAME_MIN..=CUSTOMER_NAME_MAX).contains(&name_len) {
            return Err(AppError::ValidationError(format!(
                "Customer name must be between {CUSTOMER_NAME_MIN} and {CUSTOMER_NAME_MAX} characters"
            )));
        }
        if !self.customer_info.email.contains('@') {
            return Err(AppError::ValidationError(
                "Customer email is invalid".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ticket_type_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.tickets.iter().map(|line| line.type_id).collect();
        ids.sort_unstable();
        ids
    }
}

/// A line that passed every stock check and is ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub ticket_type_id: i64,
    pub ticket_type_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedLine {
    pub reservation_id: i64,
    pub ticket_type_id: i64,
    pub ticket_type_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl ReservedLine {
    pub fn new(reservation_id: i64, line: &PlannedLine) -> Self {
        Self {
            reservation_id,
            ticket_type_id: line.ticket_type_id,
            ticket_type_name: line.ticket_type_name.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
            subtotal_cents: line.unit_price_cents * i64::from(line.quantity),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationReceipt {
    pub reservation_ids: Vec<i64>,
    pub reservations: Vec<ReservedLine>,
    pub customer_info: CustomerInfo,
    pub total_amount: i64,
    pub expires_at: DateTime<Utc>,
}

impl ReservationReceipt {
    pub fn new(
        lines: Vec<ReservedLine>,
        customer_info: CustomerInfo,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_ids: lines.iter().map(|line| line.reservation_id).collect(),
            total_amount: lines.iter().map(|line| line.subtotal_cents).sum(),
            reservations: lines,
            customer_info,
            expires_at,
        }
    }
}

/// Checks every requested line against the locked ticket types of the event.
///
/// `locked` holds the rows returned by the `FOR UPDATE` read and `live_reserved`
/// the live reservation sum per ticket type. Either every line is planned or the
/// first failing line's error is returned.
pub fn plan_reservation(
    request: &ReservationRequest,
    locked: &[TicketType],
    live_reserved: &HashMap<i64, i64>,
    now: DateTime<Utc>,
) -> Result<Vec<PlannedLine>, AppError> {
    let by_id: HashMap<i64, &TicketType> = locked
        .iter()
        .filter(|tt| tt.event_id == request.event_id && tt.is_active)
        .map(|tt| (tt.id, tt))
        .collect();

    let mut planned = Vec::with_capacity(request.tickets.len());
    for line in &request.tickets {
        let ticket_type = by_id
            .get(&line.type_id)
            .ok_or(AppError::TicketTypeNotFound)?;

        if !ticket_type.sale_window_open(now) {
            return Err(AppError::TicketNotOnSale {
                ticket_type: ticket_type.name.clone(),
            });
        }

        let reserved = live_reserved.get(&ticket_type.id).copied().unwrap_or(0);
        let available = ticket_type.available(reserved);
        if available < i64::from(line.quantity) {
            return Err(AppError::InsufficientStock {
                ticket_type: ticket_type.name.clone(),
                available,
            });
        }

        planned.push(PlannedLine {
            ticket_type_id: ticket_type.id,
            ticket_type_name: ticket_type.name.clone(),
            quantity: line.quantity,
            unit_price_cents: ticket_type.price_cents,
        });
    }
    Ok(planned)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    #[serde(flatten)]
    pub detail: ReservationDetail,
    pub total_cents: i64,
    pub is_expired: bool,
    pub tickets: Vec<GeneratedTicket>,
}

#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn InventoryStore>,
    locks: LockManager,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn InventoryStore>, locks: LockManager) -> Self {
        Self { store, locks }
    }

    pub async fn create_reservation(
        &self,
        request: &ReservationRequest,
        now: DateTime<Utc>,
    ) -> Result<ReservationReceipt, AppError> {
        request.validate()?;
        let expires_at = now + Duration::minutes(RESERVATION_WINDOW_MINUTES);
        let key = LockKey::ticket_types(request.event_id, &request.ticket_type_ids());

        let store = &self.store;
        let receipt = self
            .locks
            .run_locked(&key, || async {
                store.reserve_ticket_types(request, expires_at, now).await
            })
            .await?;

        tracing::info!(
            event_id = request.event_id,
            reservation_ids = ?receipt.reservation_ids,
            total_cents = receipt.total_amount,
            "Ticket reservation created"
        );
        Ok(receipt)
    }

    pub async fn ticket_types(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketTypeAvailability>, AppError> {
        self.store.list_ticket_types(event_id, now).await
    }

    pub async fn reservation(&self, id: i64, now: DateTime<Utc>) -> Result<ReservationView, AppError> {
        let detail = self
            .store
            .get_reservation(id)
            .await?
            .ok_or(AppError::ReservationNotFound(id))?;
        let tickets = self.store.reservation_tickets(id).await?;
        Ok(ReservationView {
            total_cents: detail.total_cents(),
            is_expired: detail.reservation.expires_at <= now,
            detail,
            tickets,
        })
    }

    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.store.expire_reservations(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_type(id: i64, total: i32, sold: i32) -> TicketType {
        TicketType {
            id,
            event_id: 1,
            name: format!("Type {id}"),
            description: None,
            price_cents: 5000,
            quantity_total: total,
            quantity_sold: sold,
            sale_start: None,
            sale_end: None,
            is_active: true,
        }
    }

    fn request(lines: &[(i64, i32)]) -> ReservationRequest {
        ReservationRequest {
            event_id: 1,
            tickets: lines
                .iter()
                .map(|&(type_id, quantity)| ReservationLine { type_id, quantity })
                .collect(),
            customer_info: CustomerInfo {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                phone: None,
            },
        }
    }

    #[test]
    fn insufficient_stock_reports_what_is_left() {
        let now = Utc::now();
        let types = vec![ticket_type(3, 100, 96)];
        let err = plan_reservation(&request(&[(3, 5)]), &types, &HashMap::new(), now).unwrap_err();
        match err {
            AppError::InsufficientStock { available, .. } => assert_eq!(available, 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn live_reservations_count_against_stock() {
        let now = Utc::now();
        let types = vec![ticket_type(3, 10, 0)];
        let reserved = HashMap::from([(3, 8)]);
        assert!(plan_reservation(&request(&[(3, 3)]), &types, &reserved, now).is_err());
        assert!(plan_reservation(&request(&[(3, 2)]), &types, &reserved, now).is_ok());
    }

    #[test]
    fn inactive_or_foreign_types_are_not_found() {
        let now = Utc::now();
        let mut inactive = ticket_type(3, 10, 0);
        inactive.is_active = false;
        let mut other_event = ticket_type(4, 10, 0);
        other_event.event_id = 2;

        for types in [vec![inactive], vec![other_event]] {
            let id = types[0].id;
            let err = plan_reservation(&request(&[(id, 1)]), &types, &HashMap::new(), now).unwrap_err();
            assert!(matches!(err, AppError::TicketTypeNotFound));
        }
    }

    #[test]
    fn closed_sale_window_is_not_on_sale() {
        let now = Utc::now();
        let mut tt = ticket_type(3, 10, 0);
        tt.sale_end = Some(now - Duration::minutes(1));
        let err = plan_reservation(&request(&[(3, 1)]), &[tt], &HashMap::new(), now).unwrap_err();
        assert!(matches!(err, AppError::TicketNotOnSale { .. }));
    }

    #[test]
    fn request_validation() {
        assert!(request(&[(3, 1)]).validate().is_ok());
        assert!(request(&[]).validate().is_err());
        assert!(request(&[(3, 11)]).validate().is_err());
        assert!(request(&[(3, 0)]).validate().is_err());
        assert!(request(&[(3, 1), (3, 2)]).validate().is_err());

        let mut bad_email = request(&[(3, 1)]);
        bad_email.customer_info.email = "nope".into();
        assert!(bad_email.validate().is_err());

        let mut short_name = request(&[(3, 1)]);
        short_name.customer_info.name = "A".into();
        assert!(short_name.validate().is_err());
    }

    #[test]
    fn receipt_totals_all_lines() {
        let lines = vec![
            ReservedLine::new(
                10,
                &PlannedLine {
                    ticket_type_id: 3,
                    ticket_type_name: "GA".into(),
                    quantity: 2,
                    unit_price_cents: 5000,
                },
            ),
            ReservedLine::new(
                11,
                &PlannedLine {
                    ticket_type_id: 4,
                    ticket_type_name: "VIP".into(),
                    quantity: 1,
                    unit_price_cents: 12000,
                },
            ),
        ];
        let receipt = ReservationReceipt::new(lines, request(&[]).customer_info, Utc::now());
        assert_eq!(receipt.reservation_ids, vec![10, 11]);
        assert_eq!(receipt.total_amount, 22000);
    }
}
