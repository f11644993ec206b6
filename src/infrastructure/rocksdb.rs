use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::changeset::Changeset;
use crate::domain::event::{Event, EventStatus};
use crate::domain::ids::{BookingId, EventId, PaymentId, UserId, VenueId};
use crate::domain::payment::Payment;
use crate::domain::ports::Store;
use crate::domain::venue::Venue;
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Column Family for venues.
pub const CF_VENUES: &str = "venues";
/// Column Family for events.
pub const CF_EVENTS: &str = "events";
/// Column Family for bookings.
pub const CF_BOOKINGS: &str = "bookings";
/// Column Family for payment and refund rows.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for bookkeeping such as the id counter.
pub const CF_META: &str = "meta";

const NEXT_ID_KEY: &[u8] = b"next_id";

/// A persistent store implementation using RocksDB.
///
/// Each table lives in its own Column Family, keyed by the big-endian record
/// id, with JSON values. A changeset is written as a single `WriteBatch`
/// while holding the commit lock, so the pending-uniqueness check and the
/// write cannot interleave with another commit.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_lock: Arc<tokio::sync::Mutex<()>>,
    next_id: Arc<Mutex<u64>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every column family exists and resumes id allocation
    /// where the previous process stopped.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_VENUES, CF_EVENTS, CF_BOOKINGS, CF_PAYMENTS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let next_id = {
            let meta = column(&db, CF_META)?;
            match db.get_cf(meta, NEXT_ID_KEY)? {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        BookingError::IntegrityError("corrupt id counter".to_string())
                    })?;
                    u64::from_be_bytes(raw)
                }
                None => 1,
            }
        };

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::default(),
            next_id: Arc::new(Mutex::new(next_id)),
        })
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, id: u64) -> Result<Option<T>> {
        let handle = column(&self.db, cf)?;
        match self.db.get_pinned_cf(handle, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str, keep: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let handle = column(&self.db, cf)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item?;
            let row: T = serde_json::from_slice(&value)?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

fn column<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| {
        BookingError::InternalError(Box::new(std::io::Error::other(format!(
            "{name} column family not found"
        ))))
    })
}

fn stage<T: Serialize>(batch: &mut WriteBatch, cf: &ColumnFamily, id: u64, row: &T) -> Result<()> {
    batch.put_cf(cf, id.to_be_bytes(), serde_json::to_vec(row)?);
    Ok(())
}

#[async_trait]
impl Store for RocksDBStore {
    async fn next_id(&self) -> Result<u64> {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        let meta = column(&self.db, CF_META)?;
        self.db.put_cf(meta, NEXT_ID_KEY, (id + 1).to_be_bytes())?;
        *next = id + 1;
        Ok(id)
    }

    async fn venue(&self, id: VenueId) -> Result<Option<Venue>> {
        self.get(CF_VENUES, id.0)
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        self.get(CF_EVENTS, id.0)
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>> {
        self.get(CF_BOOKINGS, id.0)
    }

    async fn booking_by_public_id(&self, public_id: Uuid) -> Result<Option<Booking>> {
        Ok(self
            .scan(CF_BOOKINGS, |b: &Booking| b.public_id == public_id)?
            .into_iter()
            .next())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.get(CF_PAYMENTS, id.0)
    }

    async fn events_at_venue(&self, venue: VenueId) -> Result<Vec<Event>> {
        self.scan(CF_EVENTS, |e: &Event| e.venue == venue)
    }

    async fn events_with_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        self.scan(CF_EVENTS, |e: &Event| e.status == status)
    }

    async fn bookings_for_event(&self, event: EventId) -> Result<Vec<Booking>> {
        self.scan(CF_BOOKINGS, |b: &Booking| b.event == event)
    }

    async fn bookings_for_user(&self, user: UserId, event: EventId) -> Result<Vec<Booking>> {
        self.scan(CF_BOOKINGS, |b: &Booking| b.user == user && b.event == event)
    }

    async fn expired_pending_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>> {
        self.scan(CF_BOOKINGS, |b: &Booking| {
            b.status == BookingStatus::Pending && b.is_expired_at(now)
        })
    }

    async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>> {
        self.scan(CF_PAYMENTS, |p: &Payment| p.booking == booking)
    }

    async fn payments_by_session(&self, session_id: &str) -> Result<Vec<Payment>> {
        self.scan(CF_PAYMENTS, |p: &Payment| {
            p.session_id.as_deref() == Some(session_id)
        })
    }

    async fn payments_by_intent(&self, payment_intent: &str) -> Result<Vec<Payment>> {
        self.scan(CF_PAYMENTS, |p: &Payment| {
            p.payment_intent.as_deref() == Some(payment_intent)
        })
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        let _guard = self.commit_lock.lock().await;

        let stored: Vec<Booking> = self.scan(CF_BOOKINGS, |b: &Booking| {
            changes
                .bookings
                .iter()
                .any(|c| c.user == b.user && c.event == b.event)
        })?;
        let stored: Vec<&Booking> = stored.iter().collect();
        if let Some(clash) = changes.pending_conflict(&stored) {
            return Err(BookingError::IntegrityError(format!(
                "user {} already has a pending booking for event {}",
                clash.user, clash.event
            )));
        }

        let mut batch = WriteBatch::default();
        let venues = column(&self.db, CF_VENUES)?;
        for venue in &changes.venues {
            stage(&mut batch, venues, venue.id.0, venue)?;
        }
        let events = column(&self.db, CF_EVENTS)?;
        for event in &changes.events {
            stage(&mut batch, events, event.id.0, event)?;
        }
        let bookings = column(&self.db, CF_BOOKINGS)?;
        for booking in &changes.bookings {
            stage(&mut batch, bookings, booking.id.0, booking)?;
        }
        let payments = column(&self.db, CF_PAYMENTS)?;
        for payment in &changes.payments {
            stage(&mut batch, payments, payment.id.0, payment)?;
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn venue(id: u64) -> Venue {
        Venue {
            id: VenueId(id),
            name: "Cafe".to_string(),
            capacity: 12,
            active: true,
        }
    }

    fn pending(id: u64, user: u64) -> Booking {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        Booking {
            id: BookingId(id),
            public_id: Uuid::new_v4(),
            user: UserId(user),
            event: EventId(1),
            status: BookingStatus::Pending,
            quantity: 1,
            amount: 1200,
            currency: "eur".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(15),
            confirmed_at: None,
            cancelled_at: None,
            confirmed_after_expiry: false,
            payment_reference: None,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for cf in [CF_VENUES, CF_EVENTS, CF_BOOKINGS, CF_PAYMENTS, CF_META] {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_and_read_back() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let booking = pending(2, 7);

        store
            .commit(Changeset {
                venues: vec![venue(1)],
                bookings: vec![booking.clone()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.venue(VenueId(1)).await.unwrap(), Some(venue(1)));
        assert_eq!(
            store.booking_by_public_id(booking.public_id).await.unwrap(),
            Some(booking.clone())
        );
        assert_eq!(
            store.bookings_for_user(UserId(7), EventId(1)).await.unwrap(),
            vec![booking]
        );
        assert!(store.event(EventId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_rejects_second_pending_atomically() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        store
            .commit(Changeset {
                bookings: vec![pending(2, 7)],
                ..Default::default()
            })
            .await
            .unwrap();

        let result = store
            .commit(Changeset {
                venues: vec![venue(1)],
                bookings: vec![pending(3, 7)],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(BookingError::IntegrityError(_))));
        assert!(store.venue(VenueId(1)).await.unwrap().is_none());
        assert!(store.booking(BookingId(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        let last = {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.next_id().await.unwrap();
            store.next_id().await.unwrap()
        };
        let reopened = RocksDBStore::open(dir.path()).unwrap();
        assert!(reopened.next_id().await.unwrap() > last);
    }
}
