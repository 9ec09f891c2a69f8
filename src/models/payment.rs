use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

pub const PAYMENT_APPROVED: &str = "approved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub order_id: Option<i64>,
    pub provider_payment_id: String,
    pub reference: Option<String>,
    pub status: String,
    pub amount_cents: i64,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: i64,
    pub payment_id: i64,
    pub provider_refund_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Refund as confirmed by the payment provider, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRefund {
    pub provider_refund_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub order_id: i64,
    pub payment_id: String,
    pub status: String,
    pub order_status: String,
    pub amount_cents: i64,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What a payment settles. Encoded into the provider's external reference when a
/// checkout preference is created, so the webhook never has to guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementTarget {
    Order(i64),
    Reservations(Vec<i64>),
}

impl fmt::Display for SettlementTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementTarget::Order(id) => write!(f, "order:{id}"),
            SettlementTarget::Reservations(ids) => {
                let joined: Vec<String> = ids.iter().map(i64::to_string).collect();
                write!(f, "reservations:{}", joined.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised payment reference: {0}")]
pub struct UnknownReference(pub String);

impl FromStr for SettlementTarget {
    type Err = UnknownReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownReference(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(unknown)?;
        match kind {
            "order" => rest.parse().map(SettlementTarget::Order).map_err(|_| unknown()),
            "reservations" => {
                let ids = rest
                    .split(',')
                    .map(|id| id.trim().parse::<i64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| unknown())?;
                if ids.is_empty() {
                    return Err(unknown());
                }
                Ok(SettlementTarget::Reservations(ids))
            }
            _ => Err(unknown()),
        }
    }
}

/// Business effect of a provider status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementAction {
    Approve,
    Cancel,
    /// Stored on the payment ledger only.
    Record,
}

impl SettlementAction {
    pub fn from_provider_status(status: &str) -> Self {
        match status {
            "approved" => SettlementAction::Approve,
            "cancelled" | "rejected" => SettlementAction::Cancel,
            _ => SettlementAction::Record,
        }
    }
}

/// A provider payment as confirmed by looking it up after a webhook delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    pub payment_id: String,
    pub status: String,
    pub reference: Option<String>,
    pub amount_cents: i64,
    pub approved_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

impl PaymentNotification {
    pub fn action(&self) -> SettlementAction {
        SettlementAction::from_provider_status(&self.status)
    }

    pub fn target(&self) -> Option<SettlementTarget> {
        self.reference.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub action: Option<SettlementAction>,
    pub transitioned: Vec<i64>,
    pub tickets_issued: usize,
    pub seats_released: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_typed() {
        assert_eq!(
            "order:55".parse::<SettlementTarget>(),
            Ok(SettlementTarget::Order(55))
        );
        assert_eq!(
            "reservations:3,4".parse::<SettlementTarget>(),
            Ok(SettlementTarget::Reservations(vec![3, 4]))
        );
        // a single reservation is not mistaken for an order
        assert_eq!(
            "reservations:3".parse::<SettlementTarget>(),
            Ok(SettlementTarget::Reservations(vec![3]))
        );
        assert!("55".parse::<SettlementTarget>().is_err());
        assert!("order:abc".parse::<SettlementTarget>().is_err());
    }

    #[test]
    fn reference_display_matches_parse() {
        let target = SettlementTarget::Reservations(vec![1, 2, 3]);
        assert_eq!(target.to_string(), "reservations:1,2,3");
    }

    #[test]
    fn provider_statuses_map_to_actions() {
        assert_eq!(SettlementAction::from_provider_status("approved"), SettlementAction::Approve);
        assert_eq!(SettlementAction::from_provider_status("rejected"), SettlementAction::Cancel);
        assert_eq!(SettlementAction::from_provider_status("cancelled"), SettlementAction::Cancel);
        assert_eq!(SettlementAction::from_provider_status("in_process"), SettlementAction::Record);
    }
}
