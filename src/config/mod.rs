use std::env;
use std::str::FromStr;

pub mod cors;

pub use cors::create_cors_layer;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_HOLD_MINUTES: i64 = 7;
const DEFAULT_QUEUE_MAX_SIZE: u64 = 1000;
const DEFAULT_QUEUE_TIMEOUT_MINUTES: i64 = 15;
const DEFAULT_MP_API_BASE: &str = "https://api.mercadopago.com";

/// Hits allowed per client and window for each route group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Every `/api` route, per 15 minutes.
    pub general: u64,
    /// Holds, orders and payment preferences, per minute. Successful requests are not counted.
    pub purchase: u64,
    /// Payment webhooks, per minute.
    pub webhook: u64,
    /// Refunds, per 15 minutes.
    pub strict: u64,
    pub queue_join: u64,
    pub queue_position: u64,
    pub queue_verify: u64,
    pub queue_status: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: 100,
            purchase: 5,
            webhook: 100,
            strict: 20,
            queue_join: 10,
            queue_position: 30,
            queue_verify: 20,
            queue_status: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            general: parse_or("RATE_LIMIT_GENERAL", defaults.general),
            purchase: parse_or("RATE_LIMIT_PURCHASE", defaults.purchase),
            webhook: parse_or("RATE_LIMIT_WEBHOOK", defaults.webhook),
            strict: parse_or("RATE_LIMIT_STRICT", defaults.strict),
            queue_join: parse_or("RATE_LIMIT_QUEUE_JOIN", defaults.queue_join),
            queue_position: parse_or("RATE_LIMIT_QUEUE_POSITION", defaults.queue_position),
            queue_verify: parse_or("RATE_LIMIT_QUEUE_VERIFY", defaults.queue_verify),
            queue_status: parse_or("RATE_LIMIT_QUEUE_STATUS", defaults.queue_status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub hold_minutes: i64,
    pub queue_max_size: u64,
    pub queue_timeout_minutes: i64,
    pub webhook_secret: Option<String>,
    pub mp_access_token: String,
    pub mp_api_base: String,
    pub base_url: String,
    pub admin_token: Option<String>,
    pub production: bool,
    pub rate_limits: RateLimitConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = parse_or("PORT", DEFAULT_PORT);
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/boxoffice".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            port,
            hold_minutes: parse_or("HOLD_MINUTES", DEFAULT_HOLD_MINUTES),
            queue_max_size: parse_or("QUEUE_MAX_SIZE", DEFAULT_QUEUE_MAX_SIZE),
            queue_timeout_minutes: parse_or("QUEUE_TIMEOUT_MINUTES", DEFAULT_QUEUE_TIMEOUT_MINUTES),
            webhook_secret: non_empty("MERCADOPAGO_WEBHOOK_SECRET"),
            mp_access_token: env::var("MP_ACCESS_TOKEN").unwrap_or_default(),
            mp_api_base: env::var("MP_API_BASE").unwrap_or_else(|_| DEFAULT_MP_API_BASE.to_string()),
            base_url: env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}")),
            admin_token: non_empty("ADMIN_API_TOKEN"),
            production: env::var("RUST_ENV").is_ok_and(|value| value == "production"),
            rate_limits: RateLimitConfig::from_env(),
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{} has an invalid value '{}', using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(parse_or("BOXOFFICE_TEST_UNSET_PORT", DEFAULT_PORT), 3001);
        assert_eq!(non_empty("BOXOFFICE_TEST_UNSET_SECRET"), None);
    }

    #[test]
    fn rate_limits_default_when_unset() {
        let limits = RateLimitConfig::from_env();
        if env::var("RATE_LIMIT_PURCHASE").is_err() {
            assert_eq!(limits.purchase, 5);
        }
        if env::var("RATE_LIMIT_STRICT").is_err() {
            assert_eq!(limits.strict, 20);
        }
    }
}
