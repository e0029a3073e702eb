// libs/appointment-cell/src/services/reservation.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Held for the duration of a compute-then-write section. Dropping it
/// releases the reservation.
pub struct SlotGuard {
    _lease: Box<dyn Send>,
}

impl SlotGuard {
    pub fn new(lease: impl Send + 'static) -> Self {
        Self {
            _lease: Box::new(lease),
        }
    }
}

/// Serializes availability checks and the writes that depend on them for one
/// professional's calendar day.
#[async_trait]
pub trait SlotReservation: Send + Sync {
    async fn reserve(&self, professional_id: Uuid, date: NaiveDate) -> SlotGuard;
}

/// Per-(professional, date) async mutex. Only serializes writers inside this
/// process; the database unique index covers multi-instance deployments.
#[derive(Default)]
pub struct InProcessSlotReservation {
    locks: Mutex<HashMap<(Uuid, NaiveDate), Arc<Mutex<()>>>>,
}

impl InProcessSlotReservation {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotReservation for InProcessSlotReservation {
    async fn reserve(&self, professional_id: Uuid, date: NaiveDate) -> SlotGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry((professional_id, date)).or_default().clone()
        };
        debug!("Reserving calendar of {} on {}", professional_id, date);
        SlotGuard::new(lock.lock_owned().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_day_reservations_are_serialized() {
        let reservations = Arc::new(InProcessSlotReservation::new());
        let professional = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();

        let guard = reservations.reserve(professional, date).await;

        let contender = {
            let reservations = reservations.clone();
            tokio::spawn(async move {
                let _guard = reservations.reserve(professional, date).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_days_do_not_block() {
        let reservations = InProcessSlotReservation::new();
        let professional = Uuid::new_v4();
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();

        let _held = reservations.reserve(professional, monday).await;
        let other = tokio::time::timeout(
            Duration::from_millis(200),
            reservations.reserve(professional, tuesday),
        )
        .await;
        assert!(other.is_ok());
    }
}
