use std::sync::Arc;

use crate::config::Config;
use crate::services::{
    HoldEngine, IdempotencyCache, LockManager, OrderEngine, PaymentProvider, PaymentService,
    RateLimiter, RateLimits, ReservationEngine, SettlementProcessor, VirtualQueue, WebhookVerifier,
};
use crate::store::{CoordinationStore, InventoryStore, SettingsProvider};

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub holds: HoldEngine,
    pub orders: OrderEngine,
    pub reservations: ReservationEngine,
    pub payments: PaymentService,
    pub settlement: SettlementProcessor,
    pub queue: VirtualQueue,
    pub idempotency: IdempotencyCache,
    pub verifier: WebhookVerifier,
    pub rate_limiter: RateLimiter,
    pub rate_limits: RateLimits,
    pub admin_token: Option<String>,
}

/// Backends the engines are built over.
pub struct Backends {
    pub inventory: Arc<dyn InventoryStore>,
    pub settings: Arc<dyn SettingsProvider>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub provider: Arc<dyn PaymentProvider>,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Self {
        Self::with_locks(config, LockManager::new(backends.coordination.clone()), backends)
    }

    pub fn with_locks(config: &Config, locks: LockManager, backends: Backends) -> Self {
        let Backends {
            inventory,
            settings,
            coordination,
            provider,
        } = backends;

        Self {
            holds: HoldEngine::new(inventory.clone(), locks.clone(), config.hold_minutes),
            orders: OrderEngine::new(inventory.clone(), settings, locks.clone()),
            reservations: ReservationEngine::new(inventory.clone(), locks.clone()),
            payments: PaymentService::new(inventory.clone(), provider.clone(), locks.clone()),
            settlement: SettlementProcessor::new(
                inventory,
                provider,
                coordination.clone(),
                locks.clone(),
            ),
            queue: VirtualQueue::new(
                coordination.clone(),
                locks,
                config.queue_max_size,
                config.queue_timeout_minutes,
            ),
            idempotency: IdempotencyCache::new(coordination.clone()),
            rate_limiter: RateLimiter::new(coordination),
            rate_limits: RateLimits::from_config(&config.rate_limits),
            verifier: WebhookVerifier::new(config.webhook_secret.clone(), config.production),
            admin_token: config.admin_token.clone(),
        }
    }
}
