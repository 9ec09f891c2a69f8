use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::create_cors_layer;
use crate::handlers::rate_limit::{enforce, RateLimitGate};
use crate::handlers::{health_check, holds, orders, payments, queue, reservations};
use crate::services::RateLimitPolicy;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes(&state))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer())
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let limits = state.rate_limits;
    let gate = |policy: RateLimitPolicy| {
        from_fn_with_state(RateLimitGate::new(state.rate_limiter.clone(), policy), enforce)
    };

    let purchase = Router::new()
        .route("/shows/:id/holds", post(holds::create_hold))
        .route("/orders", post(orders::create_order))
        .route("/payments/create-preference", post(payments::create_order_preference))
        .route(
            "/payments/create-preference-reservation",
            post(payments::create_reservation_preference),
        )
        .route_layer(gate(limits.purchase));

    Router::new()
        .route("/health", get(health_check))
        .route("/shows/:id/seats", get(holds::seat_map))
        .route("/orders/:id", get(orders::get_order))
        .route("/tickets/reserve", post(reservations::reserve_tickets))
        .route("/tickets/reservations/:id", get(reservations::get_reservation))
        .route("/events/:id/ticket-types", get(reservations::ticket_types))
        .route("/payments/status/:order_id", get(payments::payment_status))
        .route(
            "/payments/refund/:order_id",
            post(payments::refund).route_layer(gate(limits.strict)),
        )
        .route(
            "/payments/webhook",
            post(payments::webhook).route_layer(gate(limits.webhook)),
        )
        .route(
            "/queue/:show_id/join",
            post(queue::join).route_layer(gate(limits.queue_join)),
        )
        .route(
            "/queue/:show_id/position",
            get(queue::position).route_layer(gate(limits.queue_position)),
        )
        .route("/queue/:show_id/process-next", post(queue::process_next))
        .route(
            "/queue/:show_id/verify-access",
            post(queue::verify_access).route_layer(gate(limits.queue_verify)),
        )
        .route("/queue/:show_id/leave", delete(queue::leave))
        .route(
            "/queue/:show_id/status",
            get(queue::status).route_layer(gate(limits.queue_status)),
        )
        .route("/queue/:show_id/required", put(queue::set_required))
        .merge(purchase)
        .layer(gate(limits.general))
}
