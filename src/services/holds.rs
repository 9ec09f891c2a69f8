use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{Seat, SeatView};
use crate::services::lock::{LockKey, LockManager};
use crate::store::InventoryStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldReceipt {
    pub status: &'static str,
    pub show_id: i64,
    pub seats: Vec<i64>,
    pub expires_at: DateTime<Utc>,
}

/// Sorted, deduplicated seat ids. Duplicates in a request name the same seat.
pub fn normalize_seat_ids(seat_ids: &[i64]) -> Result<Vec<i64>, AppError> {
    if seat_ids.is_empty() {
        return Err(AppError::ValidationError(
            "At least one seat is required".to_string(),
        ));
    }
    let mut ids = seat_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Decides whether the locked `seats` can be held. `requested` is normalized.
pub fn check_holdable(seats: &[Seat], requested: &[i64], now: DateTime<Utc>) -> Result<(), AppError> {
    if seats.len() != requested.len() {
        return Err(AppError::SeatsNotFound);
    }
    match seats.iter().find(|seat| !seat.is_free_at(now)) {
        Some(taken) => Err(AppError::SeatAlreadyHeldOrSold { seat_id: taken.id }),
        None => Ok(()),
    }
}

#[derive(Clone)]
pub struct HoldEngine {
    store: Arc<dyn InventoryStore>,
    locks: LockManager,
    default_minutes: i64,
}

impl HoldEngine {
    pub fn new(store: Arc<dyn InventoryStore>, locks: LockManager, default_minutes: i64) -> Self {
        Self {
            store,
            locks,
            default_minutes,
        }
    }

    pub async fn create_hold(
        &self,
        show_id: i64,
        buyer_id: i64,
        seat_ids: &[i64],
        minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<HoldReceipt, AppError> {
        let seats = normalize_seat_ids(seat_ids)?;
        let minutes = minutes.unwrap_or(self.default_minutes);
        if minutes <= 0 {
            return Err(AppError::ValidationError(
                "Hold duration must be positive".to_string(),
            ));
        }
        let until = now + Duration::minutes(minutes);

        let store = &self.store;
        self.locks
            .run_locked(&LockKey::seats(show_id, &seats), || async {
                store.hold_seats(show_id, buyer_id, &seats, until, now).await
            })
            .await?;

        tracing::info!(show_id, buyer_id, seats = ?seats, expires_at = %until, "Seats held");

        Ok(HoldReceipt {
            status: "held",
            show_id,
            seats,
            expires_at: until,
        })
    }

    pub async fn seat_map(&self, show_id: i64, now: DateTime<Utc>) -> Result<Vec<SeatView>, AppError> {
        let seats = self.store.list_seats(show_id).await?;
        Ok(seats.iter().map(|seat| SeatView::at(seat, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::seat::{SEAT_AVAILABLE, SEAT_SOLD};

    fn seat(id: i64, status: &str, reserved_until: Option<DateTime<Utc>>) -> Seat {
        Seat {
            id,
            show_id: 1,
            sector: "A".into(),
            row_label: None,
            seat_number: id as i32,
            status: status.into(),
            reserved_by: reserved_until.map(|_| 7),
            reserved_until,
            price_tier_id: None,
        }
    }

    #[test]
    fn missing_seat_is_not_found() {
        let now = Utc::now();
        let seats = vec![seat(101, SEAT_AVAILABLE, None)];
        let err = check_holdable(&seats, &[101, 102], now).unwrap_err();
        assert!(matches!(err, AppError::SeatsNotFound));
    }

    #[test]
    fn one_taken_seat_rejects_the_whole_hold() {
        let now = Utc::now();
        let seats = vec![
            seat(101, SEAT_AVAILABLE, None),
            seat(102, SEAT_AVAILABLE, Some(now + Duration::minutes(3))),
        ];
        let err = check_holdable(&seats, &[101, 102], now).unwrap_err();
        assert!(matches!(err, AppError::SeatAlreadyHeldOrSold { seat_id: 102 }));

        let sold = vec![seat(103, SEAT_SOLD, None)];
        assert!(check_holdable(&sold, &[103], now).is_err());
    }

    #[test]
    fn lapsed_holds_can_be_taken_over() {
        let now = Utc::now();
        let seats = vec![seat(101, SEAT_AVAILABLE, Some(now - Duration::seconds(1)))];
        assert!(check_holdable(&seats, &[101], now).is_ok());
    }

    #[test]
    fn seat_ids_are_normalized() {
        assert_eq!(normalize_seat_ids(&[3, 1, 3]).unwrap(), vec![1, 3]);
        assert!(normalize_seat_ids(&[]).is_err());
    }
}
