//! In-process stores for tests and local runs without Postgres or Redis.
//!
//! `MemoryInventoryStore` keeps all state behind one async mutex, so each trait
//! method observes and mutates a consistent snapshot the way a serializable
//! transaction would.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::order::{ORDER_PAID, ORDER_PENDING, ORDER_REFUNDED};
use crate::models::payment::PAYMENT_APPROVED;
use crate::models::seat::{SEAT_AVAILABLE, SEAT_SOLD};
use crate::models::ticket::{
    RESERVATION_ACTIVE, RESERVATION_CANCELLED, RESERVATION_EXPIRED, RESERVATION_PURCHASED,
    TICKET_CANCELLED, TICKET_ISSUED,
};
use crate::models::{
    GeneratedTicket, NewRefund, Order, OrderItem, OrderLine, OrderReceipt, Payment,
    PaymentNotification, PaymentStatusView, PriceTier, PricedSeat, Refund, ReservationDetail,
    Seat, SettlementOutcome, SettlementTarget, TicketReservation, TicketType,
    TicketTypeAvailability,
};
use crate::services::holds::check_holdable;
use crate::services::orders::price_order;
use crate::services::qr::{self, ReservationTicketClaims, SeatTicketClaims};
use crate::services::reservations::{
    plan_reservation, ReservationReceipt, ReservationRequest, ReservedLine,
};
use crate::services::settlement::{plan_order, plan_reservations, seats_claimable, ReservationStep};
use crate::store::{CoordinationError, CoordinationStore, InventoryStore, SettingsProvider};
use crate::utils::error::AppError;

#[derive(Default)]
struct InventoryState {
    next_id: i64,
    price_tiers: HashMap<i64, PriceTier>,
    seats: BTreeMap<i64, Seat>,
    ticket_types: BTreeMap<i64, TicketType>,
    reservations: BTreeMap<i64, TicketReservation>,
    orders: BTreeMap<i64, Order>,
    order_items: Vec<OrderItem>,
    preferences: Vec<(String, String)>,
    payments: BTreeMap<i64, Payment>,
    refunds: Vec<Refund>,
    tickets: Vec<GeneratedTicket>,
    fixed_fee_cents: i64,
}

impl InventoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_reserved(&self, now: DateTime<Utc>) -> HashMap<i64, i64> {
        let mut reserved = HashMap::new();
        for reservation in self.reservations.values().filter(|r| r.is_live_at(now)) {
            *reserved.entry(reservation.ticket_type_id).or_insert(0) += i64::from(reservation.quantity);
        }
        reserved
    }

    fn detail(&self, reservation: &TicketReservation) -> Option<ReservationDetail> {
        let ticket_type = self.ticket_types.get(&reservation.ticket_type_id)?;
        Some(ReservationDetail {
            reservation: reservation.clone(),
            event_id: ticket_type.event_id,
            ticket_type_name: ticket_type.name.clone(),
            price_cents: ticket_type.price_cents,
        })
    }

    fn order_lines(&self, order_id: i64) -> Vec<OrderLine> {
        self.order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .filter_map(|item| {
                let seat = self.seats.get(&item.seat_id)?;
                Some(OrderLine {
                    seat_id: seat.id,
                    show_id: seat.show_id,
                    sector: seat.sector.clone(),
                    row_label: seat.row_label.clone(),
                    seat_number: seat.seat_number,
                    unit_price_cents: item.unit_price_cents,
                })
            })
            .collect()
    }

    fn push_ticket(&mut self, ticket: GeneratedTicket) {
        let id = self.next_id();
        self.tickets.push(GeneratedTicket { id, ..ticket });
    }

    fn upsert_payment(&mut self, notification: &PaymentNotification, now: DateTime<Utc>) {
        let order_id = match notification.target() {
            Some(SettlementTarget::Order(id)) if self.orders.contains_key(&id) => Some(id),
            _ => None,
        };
        let existing = self
            .payments
            .values_mut()
            .find(|p| p.provider_payment_id == notification.payment_id);
        match existing {
            Some(payment) => {
                payment.status = notification.status.clone();
                payment.approved_at = notification.approved_at;
                payment.amount_cents = notification.amount_cents;
            }
            None => {
                let id = self.next_id();
                self.payments.insert(
                    id,
                    Payment {
                        id,
                        order_id,
                        provider_payment_id: notification.payment_id.clone(),
                        reference: notification.reference.clone(),
                        status: notification.status.clone(),
                        amount_cents: notification.amount_cents,
                        approved_at: notification.approved_at,
                        created_at: now,
                    },
                );
            }
        }
    }

    fn settle_order(
        &mut self,
        order_id: i64,
        notification: &PaymentNotification,
        outcome: &mut SettlementOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let Some(order) = self.orders.get(&order_id).cloned() else {
            tracing::warn!(order_id, "Payment references an unknown order");
            return Ok(());
        };
        let lines = self.order_lines(order_id);
        let seats: Vec<Seat> = lines
            .iter()
            .filter_map(|line| self.seats.get(&line.seat_id).cloned())
            .collect();
        let issued = self.tickets.iter().any(|t| t.order_id == Some(order_id));
        let claimable = seats_claimable(&seats, order.user_id, now);
        let Some(plan) = plan_order(&order, notification.action(), issued, claimable) else {
            return Ok(());
        };
        if plan.unfulfillable {
            tracing::warn!(
                order_id,
                payment_id = %notification.payment_id,
                "Approved payment for an order whose seats were sold to someone else, refund required"
            );
        }

        if let Some(status) = plan.next_status {
            if let Some(order) = self.orders.get_mut(&order_id) {
                order.status = status.to_string();
            }
            outcome.transitioned.push(order_id);
        }

        if plan.sell_seats {
            for line in &lines {
                if let Some(seat) = self.seats.get_mut(&line.seat_id) {
                    if seat.status == SEAT_AVAILABLE {
                        seat.status = SEAT_SOLD.to_string();
                    }
                }
            }
        }

        if plan.issue_tickets {
            for line in &lines {
                let claims = SeatTicketClaims::new(order_id, line.seat_id, line.show_id, &notification.payment_id, now);
                let qr_payload = qr::encode(&claims)?;
                self.push_ticket(GeneratedTicket {
                    id: 0,
                    order_id: Some(order_id),
                    seat_id: Some(line.seat_id),
                    reservation_id: None,
                    ticket_type_id: None,
                    ticket_number: None,
                    qr_payload,
                    status: TICKET_ISSUED.to_string(),
                    issued_at: now,
                });
                outcome.tickets_issued += 1;
            }
        }

        if plan.release_seats {
            for line in &lines {
                if let Some(seat) = self.seats.get_mut(&line.seat_id) {
                    if seat.status == SEAT_AVAILABLE && seat.reserved_by == Some(order.user_id) {
                        seat.reserved_by = None;
                        seat.reserved_until = None;
                        outcome.seats_released += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn settle_reservations(
        &mut self,
        ids: &[i64],
        notification: &PaymentNotification,
        outcome: &mut SettlementOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let details: Vec<ReservationDetail> = ids
            .iter()
            .filter_map(|id| self.reservations.get(id))
            .filter_map(|r| self.detail(r))
            .collect();
        let type_ids: HashSet<i64> = details.iter().map(|d| d.reservation.ticket_type_id).collect();
        let ticket_types: Vec<TicketType> = type_ids
            .iter()
            .filter_map(|id| self.ticket_types.get(id).cloned())
            .collect();
        let issued: HashSet<i64> = self.tickets.iter().filter_map(|t| t.reservation_id).collect();

        let steps = plan_reservations(
            &details,
            &ticket_types,
            &self.live_reserved(now),
            &issued,
            notification.action(),
            now,
        );

        for (reservation_id, step) in steps {
            let Some(detail) = details.iter().find(|d| d.reservation.id == reservation_id) else {
                continue;
            };
            let reservation = &detail.reservation;
            let (status, sell, issue) = match step {
                ReservationStep::Purchase { issue_tickets } => {
                    (Some(RESERVATION_PURCHASED), true, issue_tickets)
                }
                ReservationStep::IssueTickets => (None, false, true),
                ReservationStep::Cancel => (Some(RESERVATION_CANCELLED), false, false),
                ReservationStep::Unfulfillable => {
                    tracing::warn!(
                        reservation_id,
                        payment_id = %notification.payment_id,
                        "Approved payment for a lapsed reservation without stock, refund required"
                    );
                    (Some(RESERVATION_EXPIRED), false, false)
                }
            };

            if let Some(status) = status {
                if let Some(stored) = self.reservations.get_mut(&reservation_id) {
                    stored.status = status.to_string();
                }
                outcome.transitioned.push(reservation_id);
            }
            if sell {
                if let Some(tt) = self.ticket_types.get_mut(&reservation.ticket_type_id) {
                    tt.quantity_sold += reservation.quantity;
                }
            }
            if issue {
                for unit in 1..=reservation.quantity {
                    let number = qr::reservation_ticket_number(reservation.ticket_type_id, reservation_id, unit);
                    let claims = ReservationTicketClaims::new(
                        reservation_id,
                        reservation.ticket_type_id,
                        detail.event_id,
                        &notification.payment_id,
                        number.clone(),
                        &reservation.customer_email,
                        now,
                    );
                    let qr_payload = qr::encode(&claims)?;
                    self.push_ticket(GeneratedTicket {
                        id: 0,
                        order_id: None,
                        seat_id: None,
                        reservation_id: Some(reservation_id),
                        ticket_type_id: Some(reservation.ticket_type_id),
                        ticket_number: Some(number),
                        qr_payload,
                        status: TICKET_ISSUED.to_string(),
                        issued_at: now,
                    });
                    outcome.tickets_issued += 1;
                }
            }
        }
        Ok(())
    }
}

pub struct MemoryInventoryStore {
    state: Mutex<InventoryState>,
    available: AtomicBool,
}

impl Default for MemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InventoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the database being unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::ServiceUnavailable("inventory store unavailable".to_string()))
        }
    }

    pub async fn set_fixed_fee(&self, cents: i64) {
        self.state.lock().await.fixed_fee_cents = cents;
    }

    pub async fn insert_price_tier(&self, show_id: i64, name: &str, price_cents: i64) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.price_tiers.insert(
            id,
            PriceTier {
                id,
                show_id,
                name: name.to_string(),
                price_cents,
            },
        );
        id
    }

    pub async fn insert_seat(
        &self,
        show_id: i64,
        sector: &str,
        row_label: Option<&str>,
        seat_number: i32,
        price_tier_id: Option<i64>,
    ) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.seats.insert(
            id,
            Seat {
                id,
                show_id,
                sector: sector.to_string(),
                row_label: row_label.map(str::to_string),
                seat_number,
                status: SEAT_AVAILABLE.to_string(),
                reserved_by: None,
                reserved_until: None,
                price_tier_id,
            },
        );
        id
    }

    /// The id field of `ticket_type` is ignored and a fresh one assigned.
    pub async fn insert_ticket_type(&self, ticket_type: TicketType) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.ticket_types.insert(id, TicketType { id, ..ticket_type });
        id
    }

    pub async fn seat(&self, id: i64) -> Option<Seat> {
        self.state.lock().await.seats.get(&id).cloned()
    }

    pub async fn ticket_type(&self, id: i64) -> Option<TicketType> {
        self.state.lock().await.ticket_types.get(&id).cloned()
    }

    pub async fn reservation(&self, id: i64) -> Option<TicketReservation> {
        self.state.lock().await.reservations.get(&id).cloned()
    }

    pub async fn order(&self, id: i64) -> Option<Order> {
        self.state.lock().await.orders.get(&id).cloned()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn tickets(&self) -> Vec<GeneratedTicket> {
        self.state.lock().await.tickets.clone()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn refunds(&self) -> Vec<Refund> {
        self.state.lock().await.refunds.clone()
    }
}

#[async_trait]
impl SettingsProvider for MemoryInventoryStore {
    async fn fixed_fee_cents(&self) -> Result<i64, AppError> {
        self.check_available()?;
        Ok(self.state.lock().await.fixed_fee_cents)
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn hold_seats(
        &self,
        show_id: i64,
        buyer_id: i64,
        seat_ids: &[i64],
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let locked: Vec<Seat> = seat_ids
            .iter()
            .filter_map(|id| state.seats.get(id))
            .filter(|seat| seat.show_id == show_id)
            .cloned()
            .collect();
        check_holdable(&locked, seat_ids, now)?;

        for id in seat_ids {
            if let Some(seat) = state.seats.get_mut(id) {
                seat.reserved_by = Some(buyer_id);
                seat.reserved_until = Some(until);
            }
        }
        Ok(())
    }

    async fn list_seats(&self, show_id: i64) -> Result<Vec<Seat>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .seats
            .values()
            .filter(|seat| seat.show_id == show_id)
            .cloned()
            .collect())
    }

    async fn reserve_ticket_types(
        &self,
        request: &ReservationRequest,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReservationReceipt, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let ids: HashSet<i64> = request.tickets.iter().map(|line| line.type_id).collect();
        let locked: Vec<TicketType> = state
            .ticket_types
            .values()
            .filter(|tt| ids.contains(&tt.id))
            .cloned()
            .collect();
        let planned = plan_reservation(request, &locked, &state.live_reserved(now), now)?;

        let mut lines = Vec::with_capacity(planned.len());
        for line in &planned {
            let id = state.next_id();
            state.reservations.insert(
                id,
                TicketReservation {
                    id,
                    ticket_type_id: line.ticket_type_id,
                    quantity: line.quantity,
                    customer_name: request.customer_info.name.clone(),
                    customer_email: request.customer_info.email.clone(),
                    customer_phone: request.customer_info.phone.clone(),
                    status: RESERVATION_ACTIVE.to_string(),
                    expires_at,
                    created_at: now,
                },
            );
            lines.push(ReservedLine::new(id, line));
        }
        Ok(ReservationReceipt::new(lines, request.customer_info.clone(), expires_at))
    }

    async fn list_ticket_types(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketTypeAvailability>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let reserved = state.live_reserved(now);
        Ok(state
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .map(|tt| {
                let live = reserved.get(&tt.id).copied().unwrap_or(0);
                TicketTypeAvailability::at(tt.clone(), live, now)
            })
            .collect())
    }

    async fn get_reservation(&self, id: i64) -> Result<Option<ReservationDetail>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.reservations.get(&id).and_then(|r| state.detail(r)))
    }

    async fn live_reservations(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationDetail>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.reservations.get(id))
            .filter(|r| r.is_live_at(now))
            .filter_map(|r| state.detail(r))
            .collect())
    }

    async fn reservation_tickets(&self, id: i64) -> Result<Vec<GeneratedTicket>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .tickets
            .iter()
            .filter(|t| t.reservation_id == Some(id))
            .cloned()
            .collect())
    }

    async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for reservation in state.reservations.values_mut() {
            if reservation.status == RESERVATION_ACTIVE && reservation.expires_at <= now {
                reservation.status = RESERVATION_EXPIRED.to_string();
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn create_order(
        &self,
        buyer_id: i64,
        show_id: i64,
        seat_ids: &[i64],
        fixed_fee_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<OrderReceipt, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let locked: Vec<PricedSeat> = seat_ids
            .iter()
            .filter_map(|id| state.seats.get(id))
            .filter(|seat| seat.show_id == show_id)
            .map(|seat| PricedSeat {
                seat: seat.clone(),
                price_cents: seat
                    .price_tier_id
                    .and_then(|tier| state.price_tiers.get(&tier))
                    .map_or(0, |tier| tier.price_cents),
            })
            .collect();
        let lines = price_order(&locked, seat_ids, buyer_id, fixed_fee_cents, now)?;

        let total_cents = lines.iter().map(|line| line.unit_price_cents).sum();
        let order_id = state.next_id();
        state.orders.insert(
            order_id,
            Order {
                id: order_id,
                user_id: buyer_id,
                status: ORDER_PENDING.to_string(),
                total_cents,
                created_at: now,
            },
        );
        for line in &lines {
            let id = state.next_id();
            state.order_items.push(OrderItem {
                id,
                order_id,
                seat_id: line.seat_id,
                unit_price_cents: line.unit_price_cents,
            });
        }

        Ok(OrderReceipt {
            order_id,
            status: ORDER_PENDING,
            total_cents,
            seats: seat_ids.to_vec(),
            fixed_fee_cents,
        })
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AppError> {
        self.check_available()?;
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>, AppError> {
        self.check_available()?;
        Ok(self.state.lock().await.order_lines(order_id))
    }

    async fn order_tickets(&self, order_id: i64) -> Result<Vec<GeneratedTicket>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .tickets
            .iter()
            .filter(|t| t.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn record_preference(&self, reference: &str, preference_id: &str) -> Result<(), AppError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .preferences
            .push((reference.to_string(), preference_id.to_string()));
        Ok(())
    }

    async fn settle(
        &self,
        notification: &PaymentNotification,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, AppError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.upsert_payment(notification, now);

        let mut outcome = SettlementOutcome {
            action: Some(notification.action()),
            ..SettlementOutcome::default()
        };
        match notification.target() {
            Some(SettlementTarget::Order(order_id)) => {
                state.settle_order(order_id, notification, &mut outcome, now)?
            }
            Some(SettlementTarget::Reservations(ids)) => {
                state.settle_reservations(&ids, notification, &mut outcome, now)?
            }
            None => outcome.action = None,
        }
        Ok(outcome)
    }

    async fn payment_status(&self, order_id: i64) -> Result<Option<PaymentStatusView>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let Some(order) = state.orders.get(&order_id) else {
            return Ok(None);
        };
        Ok(state
            .payments
            .values()
            .filter(|p| p.order_id == Some(order_id))
            .max_by_key(|p| (p.created_at, p.id))
            .map(|p| PaymentStatusView {
                order_id,
                payment_id: p.provider_payment_id.clone(),
                status: p.status.clone(),
                order_status: order.status.clone(),
                amount_cents: p.amount_cents,
                approved_at: p.approved_at,
                created_at: p.created_at,
            }))
    }

    async fn approved_payment(&self, order_id: i64) -> Result<Option<Payment>, AppError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.order_id == Some(order_id) && p.status == PAYMENT_APPROVED)
            .cloned())
    }

    async fn record_refund(
        &self,
        order_id: i64,
        payment: &Payment,
        refund: &NewRefund,
        full: bool,
    ) -> Result<(), AppError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.refunds.push(Refund {
            id,
            payment_id: payment.id,
            provider_refund_id: refund.provider_refund_id.clone(),
            amount_cents: refund.amount_cents,
            reason: refund.reason.clone(),
            status: refund.status.clone(),
            created_at: Utc::now(),
        });

        if full {
            if let Some(order) = state.orders.get_mut(&order_id) {
                if order.status == ORDER_PAID {
                    order.status = ORDER_REFUNDED.to_string();
                }
            }
            for ticket in state.tickets.iter_mut().filter(|t| t.order_id == Some(order_id)) {
                ticket.status = TICKET_CANCELLED.to_string();
            }
        }
        Ok(())
    }
}

enum Slot {
    Value(String),
    List(VecDeque<String>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// TTL key-value store with the subset of Redis semantics the service uses.
pub struct MemoryCoordinationStore {
    entries: StdMutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl Default for MemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates Redis being unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<T, CoordinationError>,
    ) -> Result<T, CoordinationError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable("connection refused".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoordinationError::Unavailable("store poisoned".to_string()))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        f(&mut entries)
    }

    fn parse_counter(key: &str, value: &str) -> Result<i64, CoordinationError> {
        value
            .parse()
            .map_err(|_| CoordinationError::Malformed(format!("{key} is not a counter")))
    }

    fn list_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Result<Option<&'a mut VecDeque<String>>, CoordinationError> {
        match entries.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(CoordinationError::Malformed(format!("{key} is not a list"))),
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        self.with_entries(|entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Value(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Value(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(CoordinationError::Malformed(format!("{key} is a list"))),
        })
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CoordinationError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Value(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Value(value.to_string()),
                    expires_at: None,
                },
            );
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
        self.with_entries(|entries| {
            entries.remove(key);
            Ok(())
        })
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CoordinationError> {
        self.with_entries(|entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { slot: Slot::Value(value), .. }) if value == expected
            );
            if matches {
                entries.remove(key);
            }
            Ok(matches)
        })
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<u64, CoordinationError> {
        self.with_entries(|entries| {
            if let Some(list) = Self::list_mut(entries, key)? {
                list.push_back(value.to_string());
                return Ok(list.len() as u64);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::List(VecDeque::from([value.to_string()])),
                    expires_at: None,
                },
            );
            Ok(1)
        })
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        self.with_entries(|entries| {
            let popped = Self::list_mut(entries, key)?.and_then(VecDeque::pop_front);
            if Self::list_mut(entries, key)?.is_some_and(|list| list.is_empty()) {
                entries.remove(key);
            }
            Ok(popped)
        })
    }

    async fn list_len(&self, key: &str) -> Result<u64, CoordinationError> {
        self.with_entries(|entries| Ok(Self::list_mut(entries, key)?.map_or(0, |list| list.len() as u64)))
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, CoordinationError> {
        self.with_entries(|entries| {
            Ok(Self::list_mut(entries, key)?
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64, CoordinationError> {
        self.with_entries(|entries| {
            let Some(list) = Self::list_mut(entries, key)? else {
                return Ok(0);
            };
            match list.iter().position(|item| item == value) {
                Some(index) => {
                    list.remove(index);
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        self.with_entries(|entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CoordinationError> {
        self.with_entries(|entries| {
            let count = match entries.get_mut(key) {
                Some(Entry {
                    slot: Slot::Value(value),
                    ..
                }) => {
                    let count = Self::parse_counter(key, value)? + 1;
                    *value = count.to_string();
                    count
                }
                Some(_) => return Err(CoordinationError::Malformed(format!("{key} is a list"))),
                None => {
                    entries.insert(
                        key.to_string(),
                        Entry {
                            slot: Slot::Value("1".to_string()),
                            expires_at: Some(Instant::now() + ttl),
                        },
                    );
                    1
                }
            };
            Ok(count)
        })
    }

    async fn decr_if_present(&self, key: &str) -> Result<i64, CoordinationError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                slot: Slot::Value(value),
                ..
            }) => {
                let count = Self::parse_counter(key, value)? - 1;
                *value = count.to_string();
                Ok(count)
            }
            Some(_) => Err(CoordinationError::Malformed(format!("{key} is a list"))),
            None => Ok(0),
        })
    }
}
