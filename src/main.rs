use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use boxoffice_server::config::Config;
use boxoffice_server::routes::create_routes;
use boxoffice_server::services::cleanup::{run_queue_cleanup, run_reservation_sweep};
use boxoffice_server::services::MercadoPagoClient;
use boxoffice_server::state::{AppState, Backends};
use boxoffice_server::store::{CircuitBreakerStore, PgInventoryStore, RedisCoordinationStore};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let coordination = RedisCoordinationStore::new(&config.redis_url)
        .await
        .expect("Failed to connect to Redis");

    tracing::info!("Successfully connected to Redis");

    if config.webhook_secret.is_none() {
        tracing::warn!(
            production = config.production,
            "MERCADOPAGO_WEBHOOK_SECRET is not set, webhook signatures cannot be verified"
        );
    }

    let inventory = Arc::new(PgInventoryStore::new(pool));
    let provider = MercadoPagoClient::new(
        config.mp_api_base.clone(),
        config.mp_access_token.clone(),
        &config.base_url,
    );
    let state = AppState::new(
        &config,
        Backends {
            inventory: inventory.clone(),
            settings: inventory,
            coordination: Arc::new(CircuitBreakerStore::new(Arc::new(coordination))),
            provider: Arc::new(provider),
        },
    );

    tokio::spawn(run_queue_cleanup(state.queue.clone()));
    tokio::spawn(run_reservation_sweep(state.reservations.clone()));

    let app: Router = create_routes(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server failed");
}
