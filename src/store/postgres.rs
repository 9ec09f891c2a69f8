//! Postgres inventory store.
//!
//! Every mutating method runs in one transaction that locks the rows it checks
//! (`ORDER BY id FOR UPDATE`, so concurrent requests lock in the same order) and
//! hands the decision to the shared rules in `crate::services`. Returning early
//! drops the transaction, which rolls it back.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::PgConnection;

use crate::models::order::ORDER_PENDING;
use crate::models::ticket::{
    RESERVATION_CANCELLED, RESERVATION_EXPIRED, RESERVATION_PURCHASED, TICKET_ISSUED,
};
use crate::models::{
    GeneratedTicket, NewRefund, Order, OrderLine, OrderReceipt, Payment, PaymentNotification,
    PaymentStatusView, PricedSeat, ReservationDetail, Seat, SettlementOutcome,
    SettlementTarget, TicketType, TicketTypeAvailability,
};
use crate::services::holds::check_holdable;
use crate::services::orders::price_order;
use crate::services::qr::{self, ReservationTicketClaims, SeatTicketClaims};
use crate::services::reservations::{
    plan_reservation, ReservationReceipt, ReservationRequest, ReservedLine,
};
use crate::services::settlement::{plan_order, plan_reservations, seats_claimable, ReservationStep};
use crate::store::{InventoryStore, SettingsProvider};
use crate::utils::error::AppError;

const SEAT_COLUMNS: &str = "s.id, s.show_id, s.sector, s.row_label, s.seat_number, s.status, \
     s.reserved_by, s.reserved_until, s.price_tier_id";

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, description, price_cents, quantity_total, \
     quantity_sold, sale_start, sale_end, is_active";

const RESERVATION_DETAIL_SELECT: &str = "SELECT r.id, r.ticket_type_id, r.quantity, \
     r.customer_name, r.customer_email, r.customer_phone, r.status, r.expires_at, r.created_at, \
     t.event_id, t.name AS ticket_type_name, t.price_cents \
     FROM ticket_reservations r JOIN ticket_types t ON t.id = r.ticket_type_id";

const TICKET_COLUMNS: &str = "id, order_id, seat_id, reservation_id, ticket_type_id, \
     ticket_number, qr_payload, status, issued_at";

const ORDER_LINES_SELECT: &str = "SELECT s.id AS seat_id, s.show_id, s.sector, s.row_label, \
     s.seat_number, i.unit_price_cents \
     FROM order_items i JOIN seats s ON s.id = i.seat_id \
     WHERE i.order_id = $1 ORDER BY s.id";

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Live reservation quantity per ticket type among `ticket_type_ids`.
async fn live_reserved(
    conn: &mut PgConnection,
    ticket_type_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<HashMap<i64, i64>, AppError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT ticket_type_id, COALESCE(SUM(quantity), 0)::BIGINT
         FROM ticket_reservations
         WHERE ticket_type_id = ANY($1) AND status = 'ACTIVE' AND expires_at > $2
         GROUP BY ticket_type_id",
    )
    .bind(ticket_type_ids)
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().collect())
}

async fn lock_ticket_types(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<TicketType>, AppError> {
    let ticket_types: Vec<TicketType> = sqlx::query_as(&format!(
        "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = ANY($1) ORDER BY id FOR UPDATE"
    ))
    .bind(ids)
    .fetch_all(conn)
    .await?;
    Ok(ticket_types)
}

async fn insert_ticket(
    conn: &mut PgConnection,
    ticket: &GeneratedTicket,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO generated_tickets
            (order_id, seat_id, reservation_id, ticket_type_id, ticket_number, qr_payload, status, issued_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(ticket.order_id)
    .bind(ticket.seat_id)
    .bind(ticket.reservation_id)
    .bind(ticket.ticket_type_id)
    .bind(&ticket.ticket_number)
    .bind(&ticket.qr_payload)
    .bind(&ticket.status)
    .bind(ticket.issued_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn settle_order(
    conn: &mut PgConnection,
    order_id: i64,
    notification: &PaymentNotification,
    outcome: &mut SettlementOutcome,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let order: Option<Order> = sqlx::query_as(
        "SELECT id, user_id, status, total_cents, created_at FROM orders WHERE id = $1 FOR UPDATE",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(order) = order else {
        tracing::warn!(order_id, "Payment references an unknown order");
        return Ok(());
    };

    let seats: Vec<Seat> = sqlx::query_as(&format!(
        "SELECT {SEAT_COLUMNS} FROM seats s
         WHERE s.id IN (SELECT seat_id FROM order_items WHERE order_id = $1)
         ORDER BY s.id FOR UPDATE OF s"
    ))
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let (issued,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM generated_tickets WHERE order_id = $1)")
            .bind(order_id)
            .fetch_one(&mut *conn)
            .await?;

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
        sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
            .bind(order_id)
            .bind(status)
            .execute(&mut *conn)
            .await?;
        outcome.transitioned.push(order_id);
    }

    if plan.sell_seats {
        sqlx::query(
            "UPDATE seats SET status = 'SOLD'
             WHERE id IN (SELECT seat_id FROM order_items WHERE order_id = $1)
               AND status = 'AVAILABLE'",
        )
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    }

    if plan.issue_tickets {
        let lines: Vec<OrderLine> = sqlx::query_as(ORDER_LINES_SELECT)
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;
        for line in &lines {
            let claims = SeatTicketClaims::new(
                order_id,
                line.seat_id,
                line.show_id,
                &notification.payment_id,
                now,
            );
            let ticket = GeneratedTicket {
                id: 0,
                order_id: Some(order_id),
                seat_id: Some(line.seat_id),
                reservation_id: None,
                ticket_type_id: None,
                ticket_number: None,
                qr_payload: qr::encode(&claims)?,
                status: TICKET_ISSUED.to_string(),
                issued_at: now,
            };
            insert_ticket(&mut *conn, &ticket).await?;
            outcome.tickets_issued += 1;
        }
    }

    if plan.release_seats {
        let released = sqlx::query(
            "UPDATE seats SET reserved_by = NULL, reserved_until = NULL
             WHERE id IN (SELECT seat_id FROM order_items WHERE order_id = $1)
               AND status = 'AVAILABLE' AND reserved_by = $2",
        )
        .bind(order_id)
        .bind(order.user_id)
        .execute(&mut *conn)
        .await?;
        outcome.seats_released = released.rows_affected() as usize;
    }
    Ok(())
}

async fn settle_reservations(
    conn: &mut PgConnection,
    ids: &[i64],
    notification: &PaymentNotification,
    outcome: &mut SettlementOutcome,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let details: Vec<ReservationDetail> = sqlx::query_as(&format!(
        "{RESERVATION_DETAIL_SELECT} WHERE r.id = ANY($1) ORDER BY r.id FOR UPDATE OF r"
    ))
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;
    if details.is_empty() {
        tracing::warn!(reservation_ids = ?ids, "Payment references unknown reservations");
        return Ok(());
    }

    let mut type_ids: Vec<i64> = details
        .iter()
        .map(|d| d.reservation.ticket_type_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    type_ids.sort_unstable();
    let ticket_types = lock_ticket_types(&mut *conn, &type_ids).await?;
    let reserved = live_reserved(&mut *conn, &type_ids, now).await?;

    let issued_rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT reservation_id FROM generated_tickets WHERE reservation_id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;
    let issued: HashSet<i64> = issued_rows.into_iter().map(|(id,)| id).collect();

    let steps = plan_reservations(
        &details,
        &ticket_types,
        &reserved,
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
            ReservationStep::Purchase { issue_tickets } => (Some(RESERVATION_PURCHASED), true, issue_tickets),
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
            sqlx::query(
                "UPDATE ticket_reservations SET status = $2, updated_at = now() WHERE id = $1",
            )
            .bind(reservation_id)
            .bind(status)
            .execute(&mut *conn)
            .await?;
            outcome.transitioned.push(reservation_id);
        }

        if sell {
            sqlx::query("UPDATE ticket_types SET quantity_sold = quantity_sold + $2 WHERE id = $1")
                .bind(reservation.ticket_type_id)
                .bind(reservation.quantity)
                .execute(&mut *conn)
                .await?;
        }

        if issue {
            for unit in 1..=reservation.quantity {
                let number =
                    qr::reservation_ticket_number(reservation.ticket_type_id, reservation_id, unit);
                let claims = ReservationTicketClaims::new(
                    reservation_id,
                    reservation.ticket_type_id,
                    detail.event_id,
                    &notification.payment_id,
                    number.clone(),
                    &reservation.customer_email,
                    now,
                );
                let ticket = GeneratedTicket {
                    id: 0,
                    order_id: None,
                    seat_id: None,
                    reservation_id: Some(reservation_id),
                    ticket_type_id: Some(reservation.ticket_type_id),
                    ticket_number: Some(number),
                    qr_payload: qr::encode(&claims)?,
                    status: TICKET_ISSUED.to_string(),
                    issued_at: now,
                };
                insert_ticket(&mut *conn, &ticket).await?;
                outcome.tickets_issued += 1;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl SettingsProvider for PgInventoryStore {
    async fn fixed_fee_cents(&self) -> Result<i64, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM settings WHERE key = 'fixed_fee_cents'")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            None => Ok(0),
            Some((value,)) => value.trim().parse().map_err(|_| {
                AppError::InternalServerError(format!("Invalid fixed_fee_cents setting: {value}"))
            }),
        }
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn hold_seats(
        &self,
        show_id: i64,
        buyer_id: i64,
        seat_ids: &[i64],
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let seats: Vec<Seat> = sqlx::query_as(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats s
             WHERE s.show_id = $1 AND s.id = ANY($2)
             ORDER BY s.id FOR UPDATE"
        ))
        .bind(show_id)
        .bind(seat_ids)
        .fetch_all(&mut *tx)
        .await?;

        check_holdable(&seats, seat_ids, now)?;

        sqlx::query("UPDATE seats SET reserved_by = $1, reserved_until = $2 WHERE id = ANY($3)")
            .bind(buyer_id)
            .bind(until)
            .bind(seat_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_seats(&self, show_id: i64) -> Result<Vec<Seat>, AppError> {
        let seats: Vec<Seat> = sqlx::query_as(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats s WHERE s.show_id = $1
             ORDER BY s.sector, s.row_label NULLS FIRST, s.seat_number"
        ))
        .bind(show_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn reserve_ticket_types(
        &self,
        request: &ReservationRequest,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReservationReceipt, AppError> {
        let ids = request.ticket_type_ids();
        let mut tx = self.pool.begin().await?;

        let locked = lock_ticket_types(&mut tx, &ids).await?;
        let reserved = live_reserved(&mut tx, &ids, now).await?;
        let planned = plan_reservation(request, &locked, &reserved, now)?;

        let mut lines = Vec::with_capacity(planned.len());
        for line in &planned {
            let (id,): (i64,) = sqlx::query_as(
                "INSERT INTO ticket_reservations
                    (ticket_type_id, quantity, customer_name, customer_email, customer_phone,
                     status, expires_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, 'ACTIVE', $6, $7)
                 RETURNING id",
            )
            .bind(line.ticket_type_id)
            .bind(line.quantity)
            .bind(&request.customer_info.name)
            .bind(&request.customer_info.email)
            .bind(&request.customer_info.phone)
            .bind(expires_at)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            lines.push(ReservedLine::new(id, line));
        }

        tx.commit().await?;
        Ok(ReservationReceipt::new(
            lines,
            request.customer_info.clone(),
            expires_at,
        ))
    }

    async fn list_ticket_types(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketTypeAvailability>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let ticket_types: Vec<TicketType> = sqlx::query_as(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE event_id = $1 ORDER BY price_cents, id"
        ))
        .bind(event_id)
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<i64> = ticket_types.iter().map(|tt| tt.id).collect();
        let reserved = live_reserved(&mut conn, &ids, now).await?;

        Ok(ticket_types
            .into_iter()
            .map(|tt| {
                let live = reserved.get(&tt.id).copied().unwrap_or(0);
                TicketTypeAvailability::at(tt, live, now)
            })
            .collect())
    }

    async fn get_reservation(&self, id: i64) -> Result<Option<ReservationDetail>, AppError> {
        let detail: Option<ReservationDetail> =
            sqlx::query_as(&format!("{RESERVATION_DETAIL_SELECT} WHERE r.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(detail)
    }

    async fn live_reservations(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationDetail>, AppError> {
        let details: Vec<ReservationDetail> = sqlx::query_as(&format!(
            "{RESERVATION_DETAIL_SELECT}
             WHERE r.id = ANY($1) AND r.status = 'ACTIVE' AND r.expires_at > $2
             ORDER BY r.id"
        ))
        .bind(ids)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(details)
    }

    async fn reservation_tickets(&self, id: i64) -> Result<Vec<GeneratedTicket>, AppError> {
        let tickets: Vec<GeneratedTicket> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM generated_tickets WHERE reservation_id = $1 ORDER BY id"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE ticket_reservations SET status = 'EXPIRED', updated_at = now()
             WHERE status = 'ACTIVE' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_order(
        &self,
        buyer_id: i64,
        show_id: i64,
        seat_ids: &[i64],
        fixed_fee_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<OrderReceipt, AppError> {
        let mut tx = self.pool.begin().await?;

        let seats: Vec<PricedSeat> = sqlx::query_as(&format!(
            "SELECT {SEAT_COLUMNS}, COALESCE(p.price_cents, 0) AS price_cents
             FROM seats s LEFT JOIN price_tiers p ON p.id = s.price_tier_id
             WHERE s.show_id = $1 AND s.id = ANY($2)
             ORDER BY s.id FOR UPDATE OF s"
        ))
        .bind(show_id)
        .bind(seat_ids)
        .fetch_all(&mut *tx)
        .await?;

        let lines = price_order(&seats, seat_ids, buyer_id, fixed_fee_cents, now)?;
        let total_cents: i64 = lines.iter().map(|line| line.unit_price_cents).sum();

        let (order_id,): (i64,) = sqlx::query_as(
            "INSERT INTO orders (user_id, status, total_cents, created_at)
             VALUES ($1, 'PENDING', $2, $3)
             RETURNING id",
        )
        .bind(buyer_id)
        .bind(total_cents)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for line in &lines {
            sqlx::query(
                "INSERT INTO order_items (order_id, seat_id, unit_price_cents) VALUES ($1, $2, $3)",
            )
            .bind(order_id)
            .bind(line.seat_id)
            .bind(line.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(OrderReceipt {
            order_id,
            status: ORDER_PENDING,
            total_cents,
            seats: seat_ids.to_vec(),
            fixed_fee_cents,
        })
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AppError> {
        let order: Option<Order> = sqlx::query_as(
            "SELECT id, user_id, status, total_cents, created_at FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>, AppError> {
        let lines: Vec<OrderLine> = sqlx::query_as(ORDER_LINES_SELECT)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(lines)
    }

    async fn order_tickets(&self, order_id: i64) -> Result<Vec<GeneratedTicket>, AppError> {
        let tickets: Vec<GeneratedTicket> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM generated_tickets WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn record_preference(&self, reference: &str, preference_id: &str) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO payment_preferences (reference, provider_preference_id) VALUES ($1, $2)",
        )
        .bind(reference)
        .bind(preference_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn settle(
        &self,
        notification: &PaymentNotification,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, AppError> {
        let target = notification.target();
        let order_id = match &target {
            Some(SettlementTarget::Order(id)) => Some(*id),
            _ => None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO payments
                (order_id, provider_payment_id, reference, status, amount_cents, approved_at, notification)
             VALUES ((SELECT id FROM orders WHERE id = $1), $2, $3, $4, $5, $6, $7)
             ON CONFLICT (provider_payment_id) DO UPDATE SET
                status = EXCLUDED.status,
                amount_cents = EXCLUDED.amount_cents,
                approved_at = EXCLUDED.approved_at,
                notification = EXCLUDED.notification,
                updated_at = now()",
        )
        .bind(order_id)
        .bind(&notification.payment_id)
        .bind(&notification.reference)
        .bind(&notification.status)
        .bind(notification.amount_cents)
        .bind(notification.approved_at)
        .bind(Json(&notification.raw))
        .execute(&mut *tx)
        .await?;

        let mut outcome = SettlementOutcome {
            action: Some(notification.action()),
            ..SettlementOutcome::default()
        };
        match &target {
            Some(SettlementTarget::Order(id)) => {
                settle_order(&mut tx, *id, notification, &mut outcome, now).await?
            }
            Some(SettlementTarget::Reservations(ids)) => {
                settle_reservations(&mut tx, ids, notification, &mut outcome, now).await?
            }
            None => outcome.action = None,
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn payment_status(&self, order_id: i64) -> Result<Option<PaymentStatusView>, AppError> {
        let view: Option<PaymentStatusView> = sqlx::query_as(
            "SELECT p.order_id, p.provider_payment_id AS payment_id, p.status,
                    o.status AS order_status, p.amount_cents, p.approved_at, p.created_at
             FROM payments p JOIN orders o ON o.id = p.order_id
             WHERE p.order_id = $1
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(view)
    }

    async fn approved_payment(&self, order_id: i64) -> Result<Option<Payment>, AppError> {
        let payment: Option<Payment> = sqlx::query_as(
            "SELECT id, order_id, provider_payment_id, reference, status, amount_cents,
                    approved_at, created_at
             FROM payments
             WHERE order_id = $1 AND status = 'approved'
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn record_refund(
        &self,
        order_id: i64,
        payment: &Payment,
        refund: &NewRefund,
        full: bool,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO refunds (payment_id, provider_refund_id, amount_cents, reason, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(payment.id)
        .bind(&refund.provider_refund_id)
        .bind(refund.amount_cents)
        .bind(&refund.reason)
        .bind(&refund.status)
        .execute(&mut *tx)
        .await?;

        if full {
            sqlx::query(
                "UPDATE orders SET status = 'REFUNDED', updated_at = now()
                 WHERE id = $1 AND status = 'PAID'",
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE generated_tickets SET status = 'CANCELLED' WHERE order_id = $1")
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
