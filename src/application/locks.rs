use crate::domain::ids::{BookingId, EventId, VenueId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Venue(VenueId),
    Event(EventId),
    Booking(BookingId),
}

/// Row-level locks keyed by record.
///
/// Acquisition order is venue, then event, then booking. Guards release on drop.
#[derive(Debug, Default)]
pub struct LockManager {
    slots: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Holds an event lock and one of its bookings' locks.
#[derive(Debug)]
pub struct PairGuard {
    _event: OwnedMutexGuard<()>,
    _booking: OwnedMutexGuard<()>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub async fn acquire_pair(&self, event: EventId, booking: BookingId) -> PairGuard {
        let event = self.acquire(LockKey::Event(event)).await;
        let booking = self.acquire(LockKey::Booking(booking)).await;
        PairGuard {
            _event: event,
            _booking: booking,
        }
    }

    /// Drops slots nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(LockManager::new());
        let guard = locks.acquire(LockKey::Event(EventId(1))).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(LockKey::Event(EventId(1))).await;
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
    async fn test_distinct_keys_do_not_block() {
        let locks = LockManager::new();
        let _event = locks.acquire(LockKey::Event(EventId(1))).await;
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(LockKey::Booking(BookingId(1))),
        )
        .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_slots() {
        let locks = LockManager::new();
        let held = locks.acquire(LockKey::Venue(VenueId(1))).await;
        drop(locks.acquire(LockKey::Venue(VenueId(2))).await);
        assert_eq!(locks.len(), 2);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
