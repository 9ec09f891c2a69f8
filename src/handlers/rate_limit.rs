use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::services::{RateLimitPolicy, RateLimiter};
use crate::utils::error::AppError;

/// One policy bound to the limiter, installed with `from_fn_with_state`.
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: RateLimiter,
    policy: RateLimitPolicy,
}

impl RateLimitGate {
    pub fn new(limiter: RateLimiter, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }
}

pub async fn enforce(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_key(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );
    gate.limiter.check(&gate.policy, &client).await?;

    let response = next.run(request).await;
    if gate.policy.skip_successful && response.status().as_u16() < 400 {
        gate.limiter.forgive(&gate.policy, &client).await;
    }
    Ok(response)
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub fn client_key(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|value| value.to_str().ok());

    forwarded
        .into_iter()
        .chain(real_ip)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_over_the_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(client_key(&headers, Some(&peer)), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_key(&headers, None), "198.51.100.2");

        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(client_key(&HeaderMap::new(), Some(&peer)), "127.0.0.1");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }
}
