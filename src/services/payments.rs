use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::models::{PaymentStatusView, SettlementTarget};
use crate::services::lock::{LockKey, LockManager};
use crate::services::payment_provider::{
    BackUrls, Payer, PaymentProvider, PreferenceItem, PreferenceRequest,
};
use crate::store::InventoryStore;
use crate::utils::error::AppError;

const DEFAULT_REFUND_REASON: &str = "Refund requested";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_ids: Option<Vec<i64>>,
    pub preference_id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
    pub total_amount: i64,
    pub item_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub order_id: i64,
    pub refund_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub full_refund: bool,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn InventoryStore>,
    provider: Arc<dyn PaymentProvider>,
    locks: LockManager,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        provider: Arc<dyn PaymentProvider>,
        locks: LockManager,
    ) -> Self {
        Self {
            store,
            provider,
            locks,
        }
    }

    pub async fn create_order_preference(
        &self,
        order_id: i64,
        payer: Payer,
        back_urls: BackUrls,
    ) -> Result<PreferenceReceipt, AppError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(AppError::OrderNotFound(order_id))?;
        if !order.is_pending() {
            return Err(AppError::ValidationError(format!(
                "Order {order_id} is {} and cannot be paid",
                order.status
            )));
        }

        let lines = self.store.order_lines(order_id).await?;
        let items: Vec<PreferenceItem> = lines
            .iter()
            .map(|line| PreferenceItem {
                id: format!("seat_{}", line.seat_id),
                title: format!("Show {} - {}", line.show_id, line.label()),
                description: format!("Seat {}", line.label()),
                quantity: 1,
                unit_price_cents: line.unit_price_cents,
            })
            .collect();

        let reference = SettlementTarget::Order(order_id).to_string();
        let request = PreferenceRequest {
            reference: reference.clone(),
            items,
            payer,
            back_urls,
            metadata: json!({ "order_id": order_id }),
        };

        let preference = self.provider.create_preference(&request).await?;
        self.store.record_preference(&reference, &preference.id).await?;
        tracing::info!(order_id, preference_id = %preference.id, "Payment preference created for order");

        Ok(PreferenceReceipt {
            order_id: Some(order_id),
            reservation_ids: None,
            preference_id: preference.id,
            init_point: preference.init_point,
            sandbox_init_point: preference.sandbox_init_point,
            total_amount: order.total_cents,
            item_count: lines.len() as i64,
        })
    }

    /// Only ACTIVE reservations still inside their window are billed.
    pub async fn create_reservation_preference(
        &self,
        reservation_ids: &[i64],
        payer: Payer,
        back_urls: BackUrls,
        now: DateTime<Utc>,
    ) -> Result<PreferenceReceipt, AppError> {
        if reservation_ids.is_empty() {
            return Err(AppError::ValidationError(
                "At least one reservation is required".to_string(),
            ));
        }

        let reservations = self.store.live_reservations(reservation_ids, now).await?;
        if reservations.is_empty() {
            return Err(AppError::ReservationsNotFound);
        }

        let items: Vec<PreferenceItem> = reservations
            .iter()
            .map(|detail| PreferenceItem {
                id: format!("reservation_{}", detail.reservation.id),
                title: format!("Event {} - {}", detail.event_id, detail.ticket_type_name),
                description: format!("{} ticket(s)", detail.reservation.quantity),
                quantity: detail.reservation.quantity,
                unit_price_cents: detail.price_cents,
            })
            .collect();

        let ids: Vec<i64> = reservations.iter().map(|detail| detail.reservation.id).collect();
        let total_amount = reservations.iter().map(|detail| detail.total_cents()).sum();
        let item_count = reservations
            .iter()
            .map(|detail| i64::from(detail.reservation.quantity))
            .sum();

        let reference = SettlementTarget::Reservations(ids.clone()).to_string();
        let request = PreferenceRequest {
            reference: reference.clone(),
            items,
            payer,
            back_urls,
            metadata: json!({ "reservation_ids": ids, "total_reservations": ids.len() }),
        };

        let preference = self.provider.create_preference(&request).await?;
        self.store.record_preference(&reference, &preference.id).await?;
        tracing::info!(reservation_ids = ?ids, preference_id = %preference.id, "Payment preference created for reservations");

        Ok(PreferenceReceipt {
            order_id: None,
            reservation_ids: Some(ids),
            preference_id: preference.id,
            init_point: preference.init_point,
            sandbox_init_point: preference.sandbox_init_point,
            total_amount,
            item_count,
        })
    }

    pub async fn payment_status(&self, order_id: i64) -> Result<PaymentStatusView, AppError> {
        self.store
            .payment_status(order_id)
            .await?
            .ok_or(AppError::PaymentNotFound(order_id))
    }

    /// Refunds the approved payment of an order. No amount, or an amount at least
    /// the original, is a full refund.
    pub async fn refund(
        &self,
        order_id: i64,
        amount_cents: Option<i64>,
        reason: Option<String>,
    ) -> Result<RefundReceipt, AppError> {
        if amount_cents.is_some_and(|amount| amount <= 0) {
            return Err(AppError::ValidationError(
                "Refund amount must be positive".to_string(),
            ));
        }

        let store = &self.store;
        let provider = &self.provider;
        self.locks
            .run_locked(&LockKey::payment(order_id), || async {
                let payment = store
                    .approved_payment(order_id)
                    .await?
                    .ok_or(AppError::PaymentNotFound(order_id))?;

                let full = amount_cents.map_or(true, |amount| amount >= payment.amount_cents);
                let requested = if full { None } else { amount_cents };

                let mut refund = provider.refund(&payment.provider_payment_id, requested).await?;
                refund.reason = reason.unwrap_or_else(|| DEFAULT_REFUND_REASON.to_string());

                store.record_refund(order_id, &payment, &refund, full).await?;
                tracing::info!(
                    order_id,
                    refund_id = %refund.provider_refund_id,
                    amount_cents = refund.amount_cents,
                    full,
                    "Refund recorded"
                );

                Ok(RefundReceipt {
                    order_id,
                    refund_id: refund.provider_refund_id,
                    amount_cents: refund.amount_cents,
                    status: refund.status,
                    full_refund: full,
                })
            })
            .await
    }
}
