pub mod cleanup;
pub mod holds;
pub mod idempotency;
pub mod lock;
pub mod orders;
pub mod payment_provider;
pub mod payments;
pub mod qr;
pub mod queue;
pub mod rate_limit;
pub mod reservations;
pub mod settlement;
pub mod signature;

pub use holds::HoldEngine;
pub use idempotency::{IdempotencyCache, IdempotencyScope};
pub use lock::{LockKey, LockManager};
pub use orders::OrderEngine;
pub use payment_provider::{MercadoPagoClient, PaymentProvider};
pub use payments::PaymentService;
pub use queue::VirtualQueue;
pub use rate_limit::{RateLimitPolicy, RateLimiter, RateLimits};
pub use reservations::ReservationEngine;
pub use settlement::SettlementProcessor;
pub use signature::WebhookVerifier;
