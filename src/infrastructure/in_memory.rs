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
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    venues: BTreeMap<VenueId, Venue>,
    events: BTreeMap<EventId, Event>,
    bookings: BTreeMap<BookingId, Booking>,
    payments: BTreeMap<PaymentId, Payment>,
}

/// A thread-safe in-memory store for all four tables.
///
/// A single `RwLock` guards every table so a changeset is applied (and its
/// pending-uniqueness check evaluated) in one critical section. Ideal for
/// tests and the command replay tool.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    ids: Arc<AtomicU64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            ids: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn next_id(&self) -> Result<u64> {
        Ok(self.ids.fetch_add(1, Ordering::SeqCst))
    }

    async fn venue(&self, id: VenueId) -> Result<Option<Venue>> {
        Ok(self.tables.read().await.venues.get(&id).cloned())
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn booking_by_public_id(&self, public_id: Uuid) -> Result<Option<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .find(|b| b.public_id == public_id)
            .cloned())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn events_at_venue(&self, venue: VenueId) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|e| e.venue == venue)
            .cloned()
            .collect())
    }

    async fn events_with_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn bookings_for_event(&self, event: EventId) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .filter(|b| b.event == event)
            .cloned()
            .collect())
    }

    async fn bookings_for_user(&self, user: UserId, event: EventId) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .filter(|b| b.user == user && b.event == event)
            .cloned()
            .collect())
    }

    async fn expired_pending_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.booking == booking)
            .cloned()
            .collect())
    }

    async fn payments_by_session(&self, session_id: &str) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn payments_by_intent(&self, payment_intent: &str) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.payment_intent.as_deref() == Some(payment_intent))
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        let mut tables = self.tables.write().await;

        let stored: Vec<&Booking> = tables
            .bookings
            .values()
            .filter(|b| {
                changes
                    .bookings
                    .iter()
                    .any(|c| c.user == b.user && c.event == b.event)
            })
            .collect();
        if let Some(clash) = changes.pending_conflict(&stored) {
            return Err(BookingError::IntegrityError(format!(
                "user {} already has a pending booking for event {}",
                clash.user, clash.event
            )));
        }

        for venue in changes.venues {
            tables.venues.insert(venue.id, venue);
        }
        for event in changes.events {
            tables.events.insert(event.id, event);
        }
        for booking in changes.bookings {
            tables.bookings.insert(booking.id, booking);
        }
        for payment in changes.payments {
            tables.payments.insert(payment.id, payment);
        }
        Ok(())
    }
}
