#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use boxoffice_server::config::{Config, RateLimitConfig};
use boxoffice_server::models::{NewRefund, PaymentNotification, TicketType};
use boxoffice_server::routes::create_routes;
use boxoffice_server::services::payment_provider::{Preference, PreferenceRequest};
use boxoffice_server::services::signature::signature_header;
use boxoffice_server::services::{LockManager, PaymentProvider};
use boxoffice_server::state::{AppState, Backends};
use boxoffice_server::store::{MemoryCoordinationStore, MemoryInventoryStore};
use boxoffice_server::utils::error::AppError;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const ADMIN_TOKEN: &str = "admin-secret";

/// Payment provider double. Payments are registered by the test and returned on lookup.
#[derive(Default)]
pub struct FakeProvider {
    payments: Mutex<HashMap<String, PaymentNotification>>,
    pub preferences: Mutex<Vec<PreferenceRequest>>,
    pub refunds: Mutex<Vec<(String, Option<i64>)>>,
}

impl FakeProvider {
    pub fn set_payment(&self, payment_id: &str, status: &str, reference: &str, amount_cents: i64) {
        let notification = PaymentNotification {
            payment_id: payment_id.to_string(),
            status: status.to_string(),
            reference: Some(reference.to_string()),
            amount_cents,
            approved_at: (status == "approved").then(Utc::now),
            raw: json!({ "id": payment_id, "status": status, "external_reference": reference }),
        };
        self.payments
            .lock()
            .unwrap()
            .insert(payment_id.to_string(), notification);
    }

    pub fn last_preference(&self) -> Option<PreferenceRequest> {
        self.preferences.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, AppError> {
        let mut preferences = self.preferences.lock().unwrap();
        preferences.push(request.clone());
        let id = format!("pref-{}", preferences.len());
        Ok(Preference {
            init_point: format!("https://checkout.test/{id}"),
            sandbox_init_point: None,
            id,
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentNotification, AppError> {
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| AppError::ExternalServiceError(format!("unknown payment {payment_id}")))
    }

    async fn refund(&self, payment_id: &str, amount_cents: Option<i64>) -> Result<NewRefund, AppError> {
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((payment_id.to_string(), amount_cents));
        let amount = match amount_cents {
            Some(amount) => amount,
            None => self
                .payments
                .lock()
                .unwrap()
                .get(payment_id)
                .map_or(0, |p| p.amount_cents),
        };
        Ok(NewRefund {
            provider_refund_id: format!("refund-{}", refunds.len()),
            amount_cents: amount,
            reason: String::new(),
            status: "approved".to_string(),
        })
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        redis_url: String::new(),
        port: 0,
        hold_minutes: 7,
        queue_max_size: 3,
        queue_timeout_minutes: 15,
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        mp_access_token: String::new(),
        mp_api_base: String::new(),
        base_url: "http://localhost".to_string(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
        production: false,
        rate_limits: generous_rate_limits(),
    }
}

/// High enough that the concurrency tests, which all come from one client, never hit a limit.
pub fn generous_rate_limits() -> RateLimitConfig {
    RateLimitConfig {
        general: 10_000,
        purchase: 10_000,
        webhook: 10_000,
        strict: 10_000,
        queue_join: 10_000,
        queue_position: 10_000,
        queue_verify: 10_000,
        queue_status: 10_000,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub inventory: Arc<MemoryInventoryStore>,
    pub coordination: Arc<MemoryCoordinationStore>,
    pub provider: Arc<FakeProvider>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let inventory = Arc::new(MemoryInventoryStore::new());
        let coordination = Arc::new(MemoryCoordinationStore::new());
        let provider = Arc::new(FakeProvider::default());
        let locks = LockManager::new(coordination.clone()).with_retry(400, Duration::from_millis(5));

        let state = AppState::with_locks(
            &config,
            locks,
            Backends {
                inventory: inventory.clone(),
                settings: inventory.clone(),
                coordination: coordination.clone(),
                provider: provider.clone(),
            },
        );

        Self {
            router: create_routes(state.clone()),
            state,
            inventory,
            coordination,
            provider,
        }
    }

    /// Seeds `count` seats in sector A of `show_id`, all in one tier.
    pub async fn seed_seats(&self, show_id: i64, count: i32, price_cents: i64) -> Vec<i64> {
        let tier = self
            .inventory
            .insert_price_tier(show_id, "General", price_cents)
            .await;
        let mut ids = Vec::new();
        for number in 1..=count {
            ids.push(
                self.inventory
                    .insert_seat(show_id, "A", Some("1"), number, Some(tier))
                    .await,
            );
        }
        ids
    }

    pub async fn seed_ticket_type(&self, event_id: i64, name: &str, total: i32, price_cents: i64) -> i64 {
        self.inventory
            .insert_ticket_type(TicketType {
                id: 0,
                event_id,
                name: name.to_string(),
                description: None,
                price_cents,
                quantity_total: total,
                quantity_sold: 0,
                sale_start: None,
                sale_end: None,
                is_active: true,
            })
            .await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body), &[]).await
    }

    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let auth = format!("Bearer {ADMIN_TOKEN}");
        self.send(method, uri, body, &[("authorization", auth.as_str())]).await
    }

    /// Delivers a signed `payment` webhook for `payment_id`.
    pub async fn deliver_webhook(&self, payment_id: &str, request_id: &str) -> (StatusCode, Value) {
        let ts = Utc::now().timestamp();
        let signature = signature_header(WEBHOOK_SECRET, payment_id, request_id, ts).unwrap();
        let body = json!({ "type": "payment", "action": "payment.updated", "data": { "id": payment_id } });
        self.send(
            Method::POST,
            "/api/payments/webhook",
            Some(body),
            &[("x-signature", signature.as_str()), ("x-request-id", request_id)],
        )
        .await
    }
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
