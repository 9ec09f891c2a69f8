use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::services::queue::VirtualQueue;
use crate::services::reservations::ReservationEngine;

const QUEUE_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const RESERVATION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Removes queue entries that outlived the queue timeout.
pub async fn run_queue_cleanup(queue: VirtualQueue) {
    let mut interval = tokio::time::interval(QUEUE_CLEANUP_INTERVAL);
    loop {
        interval.tick().await;
        match queue.cleanup_expired(Utc::now()).await {
            Ok(0) => tracing::debug!("queue cleanup found nothing to remove"),
            Ok(removed) => info!(removed, "removed expired queue entries"),
            Err(e) => warn!(error = %e, "queue cleanup failed"),
        }
    }
}

/// Status bookkeeping only. Availability already ignores lapsed reservations.
pub async fn run_reservation_sweep(reservations: ReservationEngine) {
    let mut interval = tokio::time::interval(RESERVATION_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match reservations.expire_lapsed(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "marked lapsed reservations as expired"),
            Err(e) => warn!(error = %e, "reservation sweep failed"),
        }
    }
}
