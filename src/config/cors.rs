use std::env;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::services::idempotency::{IDEMPOTENCY_KEY_HEADER, X_IDEMPOTENCY_KEY_HEADER};

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Headers browsers may send: idempotency keys on writes, plus the provider's
/// signature headers when a webhook is replayed from a dashboard.
fn allowed_headers() -> [HeaderName; 8] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::ACCEPT,
        header::ORIGIN,
        HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
        HeaderName::from_static(X_IDEMPOTENCY_KEY_HEADER),
        HeaderName::from_static("x-signature"),
        HeaderName::from_static("x-request-id"),
    ]
}

pub fn create_cors_layer() -> CorsLayer {
    let raw = env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string());
    cors_layer(parse_origins(&raw))
}

/// Credentials are only allowed for an explicit origin list; a wildcard origin
/// with credentials is rejected by browsers and by tower-http.
pub fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(allowed_headers())
        .expose_headers([header::RETRY_AFTER, HeaderName::from_static("x-request-id")])
        .max_age(PREFLIGHT_MAX_AGE);

    if origins.is_empty() {
        tracing::warn!("CORS: no valid origins configured, allowing any origin without credentials");
        layer.allow_origin(AllowOrigin::any())
    } else {
        tracing::info!(count = origins.len(), "CORS: configured allowed origins");
        layer.allow_origin(AllowOrigin::list(origins)).allow_credentials(true)
    }
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "CORS: ignoring invalid origin");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    async fn preflight(layer: CorsLayer, origin: &str, request_headers: &str) -> axum::response::Response {
        let app = Router::new()
            .route("/api/orders", post(|| async { "ok" }))
            .layer(layer);
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/orders")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, request_headers)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    fn header_text(response: &axum::response::Response, name: HeaderName) -> String {
        response
            .headers()
            .get(name)
            .map(|value| value.to_str().unwrap().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn blank_and_invalid_origins_are_dropped() {
        let origins = parse_origins(" http://localhost:3000 , ,bad\norigin,http://localhost:5173");
        assert_eq!(origins, vec!["http://localhost:3000", "http://localhost:5173"]);
        assert!(parse_origins(" , ").is_empty());
    }

    #[tokio::test]
    async fn preflight_allows_idempotency_and_signature_headers() {
        let layer = cors_layer(parse_origins(DEFAULT_ALLOWED_ORIGINS));
        let response = preflight(layer, "http://localhost:5173", "idempotency-key,x-signature").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_text(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "http://localhost:5173"
        );
        assert_eq!(header_text(&response, header::ACCESS_CONTROL_ALLOW_CREDENTIALS), "true");
        let allowed = header_text(&response, header::ACCESS_CONTROL_ALLOW_HEADERS);
        for name in ["idempotency-key", "x-idempotency-key", "x-signature", "x-request-id"] {
            assert!(allowed.contains(name), "{name} missing from {allowed}");
        }
    }

    #[tokio::test]
    async fn unknown_origin_gets_no_allow_origin() {
        let layer = cors_layer(parse_origins(DEFAULT_ALLOWED_ORIGINS));
        let response = preflight(layer, "https://evil.example", "idempotency-key").await;
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn wildcard_origin_drops_credentials() {
        let response = preflight(cors_layer(Vec::new()), "https://any.example", "x-idempotency-key").await;
        assert_eq!(header_text(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }
}
