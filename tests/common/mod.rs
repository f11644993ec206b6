#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use eventbook::application::engine::BookingEngine;
use eventbook::application::payments::CallbackOutcome;
use eventbook::config::BookingConfig;
use eventbook::domain::booking::Booking;
use eventbook::domain::changeset::Changeset;
use eventbook::domain::event::{Difficulty, Event, EventDetails, EventStatus};
use eventbook::domain::ids::{BookingId, EventId, PaymentId, UserId, VenueId};
use eventbook::domain::payment::Payment;
use eventbook::domain::ports::{GatewayRef, Store, StoreRef};
use eventbook::domain::venue::Venue;
use eventbook::infrastructure::audit::InMemoryAuditSink;
use eventbook::infrastructure::clock::ManualClock;
use eventbook::infrastructure::gateway::MockPaymentGateway;
use eventbook::infrastructure::in_memory::InMemoryStore;
use eventbook::error::{BookingError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub const ORGANIZER: UserId = UserId(1);
pub const SUCCESS_URL: &str = "https://app.test/success";
pub const CANCEL_URL: &str = "https://app.test/cancel";

pub struct Harness {
    pub engine: Arc<BookingEngine>,
    pub clock: Arc<ManualClock>,
    pub gateway: MockPaymentGateway,
    pub audit: InMemoryAuditSink,
}

/// Monday 2026-03-02 10:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

/// Wednesday 18:00 UTC, well inside every scheduling window from `t0`.
pub fn evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 18, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(BookingConfig::default())
}

pub fn harness_with(config: BookingConfig) -> Harness {
    let gateway = MockPaymentGateway::new();
    build(Arc::new(InMemoryStore::new()), Arc::new(gateway.clone()), gateway, config)
}

/// Runs the engine against `outer`, a gateway wrapping `gateway`.
pub fn harness_over(outer: GatewayRef, gateway: MockPaymentGateway) -> Harness {
    build(Arc::new(InMemoryStore::new()), outer, gateway, BookingConfig::default())
}

pub fn harness_on(store: StoreRef) -> Harness {
    let gateway = MockPaymentGateway::new();
    build(store, Arc::new(gateway.clone()), gateway, BookingConfig::default())
}

fn build(
    store: StoreRef,
    outer: GatewayRef,
    gateway: MockPaymentGateway,
    config: BookingConfig,
) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let audit = InMemoryAuditSink::new();
    let engine = BookingEngine::new(
        store,
        outer,
        clock.clone(),
        Arc::new(audit.clone()),
        config,
    );
    Harness {
        engine: Arc::new(engine),
        clock,
        gateway,
        audit,
    }
}

pub fn details(start: DateTime<Utc>, price: i64) -> EventDetails {
    EventDetails {
        language: "italian".to_string(),
        theme: "cinema".to_string(),
        difficulty: Difficulty::Intermediate,
        start,
        price,
    }
}

pub async fn venue(h: &Harness, capacity: u32) -> Venue {
    h.engine.register_venue("Bar Centrale", capacity).await.unwrap()
}

/// Pays for a pending booking end to end through the mock gateway.
pub async fn pay(h: &Harness, booking: &Booking) -> CallbackOutcome {
    let checkout = h
        .engine
        .create_payment_session(booking.id, SUCCESS_URL, CANCEL_URL)
        .await
        .unwrap();
    match checkout.session_id {
        Some(session) => h
            .engine
            .confirm_from_callback(
                booking.public_id,
                Some(&session),
                checkout.payment.payment_intent.as_deref(),
                None,
            )
            .await
            .unwrap(),
        None => CallbackOutcome::Confirmed(checkout.booking),
    }
}

/// Creates an event at `start` and publishes it by paying the organizer booking.
pub async fn published_event(h: &Harness, venue: &Venue, start: DateTime<Utc>, price: i64) -> Event {
    let (event, organizer_booking) = h
        .engine
        .create_event(ORGANIZER, venue.id, details(start, price))
        .await
        .unwrap();
    pay(h, &organizer_booking).await;
    h.engine.event(event.id).await.unwrap()
}

/// Creates and pays a booking for `user`.
pub async fn confirmed_booking(h: &Harness, user: UserId, event: &Event) -> Booking {
    let booking = h.engine.create_booking(user, event.id, 1).await.unwrap();
    pay(h, &booking).await;
    h.engine.booking(booking.id).await.unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

/// In-memory store whose commits can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    fail_commits: AtomicBool,
}

impl FlakyStore {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn next_id(&self) -> Result<u64> {
        self.inner.next_id().await
    }

    async fn venue(&self, id: VenueId) -> Result<Option<Venue>> {
        self.inner.venue(id).await
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        self.inner.event(id).await
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>> {
        self.inner.booking(id).await
    }

    async fn booking_by_public_id(&self, public_id: Uuid) -> Result<Option<Booking>> {
        self.inner.booking_by_public_id(public_id).await
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.inner.payment(id).await
    }

    async fn events_at_venue(&self, venue: VenueId) -> Result<Vec<Event>> {
        self.inner.events_at_venue(venue).await
    }

    async fn events_with_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        self.inner.events_with_status(status).await
    }

    async fn bookings_for_event(&self, event: EventId) -> Result<Vec<Booking>> {
        self.inner.bookings_for_event(event).await
    }

    async fn bookings_for_user(&self, user: UserId, event: EventId) -> Result<Vec<Booking>> {
        self.inner.bookings_for_user(user, event).await
    }

    async fn expired_pending_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>> {
        self.inner.expired_pending_bookings(now).await
    }

    async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>> {
        self.inner.payments_for_booking(booking).await
    }

    async fn payments_by_session(&self, session_id: &str) -> Result<Vec<Payment>> {
        self.inner.payments_by_session(session_id).await
    }

    async fn payments_by_intent(&self, payment_intent: &str) -> Result<Vec<Payment>> {
        self.inner.payments_by_intent(payment_intent).await
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(BookingError::IoError(std::io::Error::other("disk full")));
        }
        self.inner.commit(changes).await
    }
}
