//! Payment settlement: turns provider notifications into inventory transitions.
//!
//! Notifications arrive at least once and in any order. Every transition is
//! guarded by the current state of the row it touches, so replaying a
//! notification is a no-op and tickets are issued at most once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::order::{ORDER_CANCELLED, ORDER_PAID, ORDER_PENDING};
use crate::models::ticket::{
    RESERVATION_ACTIVE, RESERVATION_EXPIRED, RESERVATION_PURCHASED,
};
use crate::models::{
    Order, ReservationDetail, Seat, SettlementAction, SettlementOutcome, SettlementTarget,
    TicketType,
};
use crate::services::lock::{LockKey, LockManager};
use crate::services::payment_provider::PaymentProvider;
use crate::store::{CoordinationStore, InventoryStore};
use crate::utils::error::AppError;

const PROCESSED_DELIVERY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// What an order notification does to the order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTransition {
    pub next_status: Option<&'static str>,
    pub sell_seats: bool,
    pub issue_tickets: bool,
    pub release_seats: bool,
    /// Approved, but a seat went to someone else. Needs a refund.
    pub unfulfillable: bool,
}

impl OrderTransition {
    fn to(next_status: Option<&'static str>) -> Self {
        Self {
            next_status,
            sell_seats: false,
            issue_tickets: false,
            release_seats: false,
            unfulfillable: false,
        }
    }
}

/// Whether every seat of an order can still be sold to its buyer. Callers pass
/// the seat rows locked for the settlement.
pub fn seats_claimable(seats: &[Seat], buyer_id: i64, now: DateTime<Utc>) -> bool {
    seats.iter().all(|seat| seat.is_claimable_by(buyer_id, now))
}

/// `None` means the notification is recorded without touching the order.
///
/// Only a PENDING order whose seats are still claimable is paid; an approval that
/// lost the race for its seats cancels the order instead of selling a seat twice.
pub fn plan_order(
    order: &Order,
    action: SettlementAction,
    tickets_issued: bool,
    seats_claimable: bool,
) -> Option<OrderTransition> {
    match (action, order.status.as_str()) {
        (SettlementAction::Approve, ORDER_PENDING) if seats_claimable => Some(OrderTransition {
            sell_seats: true,
            issue_tickets: !tickets_issued,
            ..OrderTransition::to(Some(ORDER_PAID))
        }),
        (SettlementAction::Approve, ORDER_PENDING) => Some(OrderTransition {
            release_seats: true,
            unfulfillable: true,
            ..OrderTransition::to(Some(ORDER_CANCELLED))
        }),
        // paid by an earlier delivery that never got as far as issuing
        (SettlementAction::Approve, ORDER_PAID) if !tickets_issued => Some(OrderTransition {
            issue_tickets: true,
            ..OrderTransition::to(None)
        }),
        (SettlementAction::Cancel, ORDER_PENDING) => Some(OrderTransition {
            release_seats: true,
            ..OrderTransition::to(Some(ORDER_CANCELLED))
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStep {
    Purchase { issue_tickets: bool },
    IssueTickets,
    Cancel,
    /// Approved after its window closed and the stock is gone. Needs a refund.
    Unfulfillable,
}

/// Plans each reservation of a notification against the locked ticket types.
///
/// `live_reserved` is the live reservation sum per ticket type, including the
/// reservations being settled. A reservation approved after its window closed
/// no longer counts in that sum, so it is purchased only if stock is still free.
pub fn plan_reservations(
    reservations: &[ReservationDetail],
    ticket_types: &[TicketType],
    live_reserved: &HashMap<i64, i64>,
    tickets_issued: &HashSet<i64>,
    action: SettlementAction,
    now: DateTime<Utc>,
) -> Vec<(i64, ReservationStep)> {
    let mut stock: HashMap<i64, (TicketType, i64)> = ticket_types
        .iter()
        .map(|tt| {
            let reserved = live_reserved.get(&tt.id).copied().unwrap_or(0);
            (tt.id, (tt.clone(), reserved))
        })
        .collect();

    let mut steps = Vec::new();
    for detail in reservations {
        let reservation = &detail.reservation;
        let issued = tickets_issued.contains(&reservation.id);

        let step = match action {
            SettlementAction::Record => None,
            SettlementAction::Cancel => {
                (reservation.status == RESERVATION_ACTIVE).then_some(ReservationStep::Cancel)
            }
            SettlementAction::Approve => match reservation.status.as_str() {
                RESERVATION_PURCHASED if !issued => Some(ReservationStep::IssueTickets),
                RESERVATION_ACTIVE | RESERVATION_EXPIRED => {
                    let quantity = i64::from(reservation.quantity);
                    let Some((ticket_type, reserved)) = stock.get_mut(&reservation.ticket_type_id)
                    else {
                        steps.push((reservation.id, ReservationStep::Unfulfillable));
                        continue;
                    };

                    if reservation.is_live_at(now) {
                        // moves from reserved to sold, availability unchanged
                        *reserved -= quantity;
                        ticket_type.quantity_sold += reservation.quantity;
                        Some(ReservationStep::Purchase { issue_tickets: !issued })
                    } else if ticket_type.available(*reserved) >= quantity {
                        ticket_type.quantity_sold += reservation.quantity;
                        Some(ReservationStep::Purchase { issue_tickets: !issued })
                    } else {
                        Some(ReservationStep::Unfulfillable)
                    }
                }
                _ => None,
            },
        };

        if let Some(step) = step {
            steps.push((reservation.id, step));
        }
    }
    steps
}

/// Incoming webhook body. Only `type == "payment"` notifications are acted on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookEvent {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Option<WebhookData>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookData {
    pub id: serde_json::Value,
}

impl WebhookEvent {
    pub fn payment_id(&self) -> Option<String> {
        if self.kind.as_deref() != Some("payment") {
            return None;
        }
        match &self.data.as_ref()?.id {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SettlementOutcome>,
}

#[derive(Clone)]
pub struct SettlementProcessor {
    store: Arc<dyn InventoryStore>,
    provider: Arc<dyn PaymentProvider>,
    coordination: Arc<dyn CoordinationStore>,
    locks: LockManager,
}

impl SettlementProcessor {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        provider: Arc<dyn PaymentProvider>,
        coordination: Arc<dyn CoordinationStore>,
        locks: LockManager,
    ) -> Self {
        Self {
            store,
            provider,
            coordination,
            locks,
        }
    }

    /// Handles one verified webhook delivery. Any failure surfaces as
    /// `WebhookProcessingFailed` so the provider retries.
    pub async fn process_webhook(
        &self,
        event: &WebhookEvent,
        request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookAck, AppError> {
        let Some(payment_id) = event.payment_id() else {
            tracing::debug!(kind = ?event.kind, "Ignoring non-payment webhook");
            return Ok(WebhookAck {
                received: true,
                ..WebhookAck::default()
            });
        };

        let dedupe_key = request_id.map(|id| format!("webhook:processed:{id}"));
        if let Some(key) = &dedupe_key {
            match self.coordination.get(key).await {
                Ok(Some(_)) => {
                    tracing::info!(payment_id = %payment_id, request_id = ?request_id, "Webhook delivery already processed");
                    return Ok(WebhookAck {
                        received: true,
                        processed: true,
                        duplicate: Some(true),
                        outcome: None,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Webhook dedupe lookup failed, processing anyway"),
            }
        }

        let outcome = self
            .settle_payment(&payment_id, now)
            .await
            .map_err(|e| {
                tracing::error!(payment_id = %payment_id, error = %e, "Webhook processing failed");
                match e {
                    AppError::WebhookProcessingFailed(_) => e,
                    other => AppError::WebhookProcessingFailed(other.to_string()),
                }
            })?;

        if let Some(key) = &dedupe_key {
            if let Err(e) = self
                .coordination
                .set_with_ttl(key, &payment_id, PROCESSED_DELIVERY_TTL)
                .await
            {
                tracing::warn!(error = %e, "Failed to record processed webhook delivery");
            }
        }

        Ok(WebhookAck {
            received: true,
            processed: true,
            duplicate: None,
            outcome: Some(outcome),
        })
    }

    /// Fetches the authoritative payment state and applies it.
    pub async fn settle_payment(
        &self,
        payment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, AppError> {
        let notification = self.provider.fetch_payment(payment_id).await?;

        let target = notification.target();
        if target.is_none() {
            tracing::warn!(
                payment_id = %notification.payment_id,
                reference = ?notification.reference,
                "Payment reference not recognised, recording without business effect"
            );
        }

        let key = match &target {
            Some(SettlementTarget::Order(order_id)) => LockKey::payment(*order_id),
            Some(other) => LockKey::payment_reference(&other.to_string()),
            None => LockKey::payment_reference(&format!("provider:{}", notification.payment_id)),
        };

        let store = &self.store;
        let outcome = self
            .locks
            .run_locked(&key, || async { store.settle(&notification, now).await })
            .await?;

        tracing::info!(
            payment_id = %notification.payment_id,
            status = %notification.status,
            reference = ?notification.reference,
            transitioned = ?outcome.transitioned,
            tickets_issued = outcome.tickets_issued,
            "Payment notification settled"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketReservation;
    use chrono::Duration as ChronoDuration;

    fn order(status: &str) -> Order {
        Order {
            id: 55,
            user_id: 9,
            status: status.into(),
            total_cents: 20000,
            created_at: Utc::now(),
        }
    }

    fn ticket_type(total: i32, sold: i32) -> TicketType {
        TicketType {
            id: 3,
            event_id: 1,
            name: "GA".into(),
            description: None,
            price_cents: 5000,
            quantity_total: total,
            quantity_sold: sold,
            sale_start: None,
            sale_end: None,
            is_active: true,
        }
    }

    fn reservation(id: i64, quantity: i32, status: &str, expires_at: DateTime<Utc>) -> ReservationDetail {
        ReservationDetail {
            reservation: TicketReservation {
                id,
                ticket_type_id: 3,
                quantity,
                customer_name: "Ana".into(),
                customer_email: "ana@example.com".into(),
                customer_phone: None,
                status: status.into(),
                expires_at,
                created_at: expires_at - ChronoDuration::minutes(15),
            },
            event_id: 1,
            ticket_type_name: "GA".into(),
            price_cents: 5000,
        }
    }

    #[test]
    fn approve_pays_pending_order_once() {
        let plan = plan_order(&order(ORDER_PENDING), SettlementAction::Approve, false, true).unwrap();
        assert_eq!(plan.next_status, Some(ORDER_PAID));
        assert!(plan.sell_seats);
        assert!(plan.issue_tickets);

        // replay after tickets exist changes nothing
        assert_eq!(plan_order(&order(ORDER_PAID), SettlementAction::Approve, true, false), None);
    }

    #[test]
    fn paid_order_without_tickets_gets_them() {
        let plan = plan_order(&order(ORDER_PAID), SettlementAction::Approve, false, false).unwrap();
        assert_eq!(plan.next_status, None);
        assert!(!plan.sell_seats);
        assert!(plan.issue_tickets);
    }

    #[test]
    fn approval_without_its_seats_cancels_the_order() {
        let plan = plan_order(&order(ORDER_PENDING), SettlementAction::Approve, false, false).unwrap();
        assert_eq!(plan.next_status, Some(ORDER_CANCELLED));
        assert!(plan.unfulfillable);
        assert!(!plan.sell_seats);
        assert!(!plan.issue_tickets);
    }

    #[test]
    fn seats_sold_or_held_by_others_are_not_claimable() {
        let now = Utc::now();
        let seat = |status: &str, reserved_by: Option<i64>, minutes: i64| Seat {
            id: 1,
            show_id: 1,
            sector: "A".into(),
            row_label: None,
            seat_number: 1,
            status: status.into(),
            reserved_by,
            reserved_until: Some(now + ChronoDuration::minutes(minutes)),
            price_tier_id: None,
        };

        assert!(seats_claimable(&[seat("AVAILABLE", Some(9), 5)], 9, now));
        assert!(seats_claimable(&[seat("AVAILABLE", Some(30), -1)], 9, now));
        assert!(!seats_claimable(&[seat("AVAILABLE", Some(9), 5), seat("SOLD", Some(9), 5)], 9, now));
        assert!(!seats_claimable(&[seat("AVAILABLE", Some(30), 5)], 9, now));
    }

    #[test]
    fn cancel_only_touches_pending_orders() {
        let plan = plan_order(&order(ORDER_PENDING), SettlementAction::Cancel, false, true).unwrap();
        assert_eq!(plan.next_status, Some(ORDER_CANCELLED));
        assert!(plan.release_seats);
        assert!(!plan.unfulfillable);

        assert_eq!(plan_order(&order(ORDER_PAID), SettlementAction::Cancel, true, false), None);
        assert_eq!(plan_order(&order(ORDER_PENDING), SettlementAction::Record, false, true), None);
    }

    #[test]
    fn live_reservation_is_purchased() {
        let now = Utc::now();
        let reservations = vec![reservation(1, 2, RESERVATION_ACTIVE, now + ChronoDuration::minutes(5))];
        let steps = plan_reservations(
            &reservations,
            &[ticket_type(10, 8)],
            &HashMap::from([(3, 2)]),
            &HashSet::new(),
            SettlementAction::Approve,
            now,
        );
        assert_eq!(steps, vec![(1, ReservationStep::Purchase { issue_tickets: true })]);
    }

    #[test]
    fn late_approval_rechecks_stock() {
        let now = Utc::now();
        let lapsed = vec![reservation(1, 2, RESERVATION_ACTIVE, now - ChronoDuration::minutes(1))];

        // another buyer took the released stock
        let steps = plan_reservations(
            &lapsed,
            &[ticket_type(10, 9)],
            &HashMap::new(),
            &HashSet::new(),
            SettlementAction::Approve,
            now,
        );
        assert_eq!(steps, vec![(1, ReservationStep::Unfulfillable)]);

        let steps = plan_reservations(
            &lapsed,
            &[ticket_type(10, 0)],
            &HashMap::new(),
            &HashSet::new(),
            SettlementAction::Approve,
            now,
        );
        assert_eq!(steps, vec![(1, ReservationStep::Purchase { issue_tickets: true })]);
    }

    #[test]
    fn late_approvals_in_one_notification_share_the_remaining_stock() {
        let now = Utc::now();
        let lapsed = vec![
            reservation(1, 2, RESERVATION_EXPIRED, now - ChronoDuration::minutes(1)),
            reservation(2, 2, RESERVATION_EXPIRED, now - ChronoDuration::minutes(1)),
        ];
        let steps = plan_reservations(
            &lapsed,
            &[ticket_type(10, 7)],
            &HashMap::new(),
            &HashSet::new(),
            SettlementAction::Approve,
            now,
        );
        assert_eq!(
            steps,
            vec![
                (1, ReservationStep::Purchase { issue_tickets: true }),
                (2, ReservationStep::Unfulfillable),
            ]
        );
    }

    #[test]
    fn replayed_approval_is_a_no_op() {
        let now = Utc::now();
        let purchased = vec![reservation(1, 2, RESERVATION_PURCHASED, now)];
        let steps = plan_reservations(
            &purchased,
            &[ticket_type(10, 2)],
            &HashMap::new(),
            &HashSet::from([1]),
            SettlementAction::Approve,
            now,
        );
        assert!(steps.is_empty());
    }

    #[test]
    fn webhook_event_extracts_payment_id() {
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "payment",
            "data": { "id": 123456 }
        }))
        .unwrap();
        assert_eq!(event.payment_id().as_deref(), Some("123456"));

        let other: WebhookEvent =
            serde_json::from_value(serde_json::json!({ "type": "merchant_order" })).unwrap();
        assert_eq!(other.payment_id(), None);
    }
}
