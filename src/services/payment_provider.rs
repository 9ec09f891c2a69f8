//! Payment provider seam and its MercadoPago-style HTTP client.
//!
//! Everything inside the service is integer cents; the provider speaks decimal
//! currency units, so conversion happens only here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{NewRefund, PaymentNotification};
use crate::utils::error::AppError;

const CURRENCY_ID: &str = "ARS";
const PREFERENCE_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payer {
    pub name: String,
    #[serde(default)]
    pub surname: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRequest {
    /// Typed settlement reference, echoed back on every payment.
    pub reference: String,
    pub items: Vec<PreferenceItem>,
    pub payer: Payer,
    pub back_urls: BackUrls,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, AppError>;

    /// Looks a payment up by id. Notifications carry only the id, never the state.
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentNotification, AppError>;

    /// `None` refunds the full amount.
    async fn refund(&self, payment_id: &str, amount_cents: Option<i64>) -> Result<NewRefund, AppError>;
}

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn decimal_to_cents(amount: Decimal) -> Result<i64, AppError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| AppError::ExternalServiceError(format!("Amount out of range: {amount}")))
}

#[derive(Serialize)]
struct ProviderItem<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    quantity: i32,
    currency_id: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
}

#[derive(Serialize)]
struct RefundBody {
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    amount: Option<Decimal>,
}

#[derive(Deserialize)]
struct ProviderPreference {
    id: String,
    init_point: String,
    sandbox_init_point: Option<String>,
}

#[derive(Deserialize)]
struct ProviderPayment {
    id: Value,
    status: String,
    external_reference: Option<String>,
    transaction_amount: Option<Decimal>,
    date_approved: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ProviderRefund {
    id: Value,
    amount: Decimal,
    status: String,
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct MercadoPagoClient {
    api_base: String,
    access_token: String,
    notification_url: String,
    http_client: Client,
}

impl MercadoPagoClient {
    pub fn new(api_base: String, access_token: String, base_url: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token,
            notification_url: format!("{}/api/payments/webhook", base_url.trim_end_matches('/')),
            http_client: Client::new(),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %error_body, "Payment provider {} failed", operation);
            return Err(AppError::ExternalServiceError(format!(
                "Payment provider {operation} failed"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("Payment provider {operation}: {e}")))
    }
}

#[async_trait]
impl PaymentProvider for MercadoPagoClient {
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, AppError> {
        let now = Utc::now();
        let items: Vec<ProviderItem<'_>> = request
            .items
            .iter()
            .map(|item| ProviderItem {
                id: &item.id,
                title: &item.title,
                description: &item.description,
                quantity: item.quantity,
                currency_id: CURRENCY_ID,
                unit_price: cents_to_decimal(item.unit_price_cents),
            })
            .collect();

        let body = json!({
            "items": items,
            "payer": {
                "name": request.payer.name,
                "surname": request.payer.surname.clone().unwrap_or_default(),
                "email": request.payer.email,
            },
            "back_urls": request.back_urls,
            "auto_return": "approved",
            "external_reference": request.reference,
            "notification_url": self.notification_url,
            "metadata": request.metadata,
            "expires": true,
            "expiration_date_from": now.to_rfc3339(),
            "expiration_date_to": (now + chrono::Duration::minutes(PREFERENCE_TTL_MINUTES)).to_rfc3339(),
        });

        let response = self
            .http_client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(e.to_string()))?;

        let preference: ProviderPreference = Self::read_json(response, "preference creation").await?;
        Ok(Preference {
            id: preference.id,
            init_point: preference.init_point,
            sandbox_init_point: preference.sandbox_init_point,
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentNotification, AppError> {
        let response = self
            .http_client
            .get(format!("{}/v1/payments/{}", self.api_base, payment_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(e.to_string()))?;

        let raw: Value = Self::read_json(response, "payment lookup").await?;
        let payment: ProviderPayment = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::ExternalServiceError(format!("Unexpected payment payload: {e}")))?;

        let amount_cents = match payment.transaction_amount {
            Some(amount) => decimal_to_cents(amount)?,
            None => 0,
        };

        Ok(PaymentNotification {
            payment_id: id_string(&payment.id),
            status: payment.status,
            reference: payment.external_reference,
            amount_cents,
            approved_at: payment.date_approved,
            raw,
        })
    }

    async fn refund(&self, payment_id: &str, amount_cents: Option<i64>) -> Result<NewRefund, AppError> {
        let body = RefundBody {
            amount: amount_cents.map(cents_to_decimal),
        };

        let response = self
            .http_client
            .post(format!("{}/v1/payments/{}/refunds", self.api_base, payment_id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(e.to_string()))?;

        let refund: ProviderRefund = Self::read_json(response, "refund").await?;
        Ok(NewRefund {
            provider_refund_id: id_string(&refund.id),
            amount_cents: decimal_to_cents(refund.amount)?,
            reason: String::new(),
            status: refund.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_trip_through_currency_units() {
        assert_eq!(cents_to_decimal(10250).to_string(), "102.50");
        assert_eq!(decimal_to_cents(Decimal::new(10250, 2)).unwrap(), 10250);
        // provider floats like 99.999 round to the nearest cent
        assert_eq!(decimal_to_cents(Decimal::new(99999, 3)).unwrap(), 10000);
    }

    #[test]
    fn numeric_payment_ids_become_strings() {
        assert_eq!(id_string(&json!(123456)), "123456");
        assert_eq!(id_string(&json!("abc")), "abc");
    }

    #[test]
    fn notification_url_is_derived_from_base_url() {
        let client = MercadoPagoClient::new(
            "https://api.mercadopago.com/".into(),
            "token".into(),
            "https://tickets.example.com/",
        );
        assert_eq!(
            client.notification_url,
            "https://tickets.example.com/api/payments/webhook"
        );
        assert_eq!(client.api_base, "https://api.mercadopago.com");
    }
}
