use super::bookings::{BookingService, Cancellation, Confirmation, ConfirmationSource};
use super::capacity::CapacityCalculator;
use super::context::Context;
use super::events::{EventCancellation, EventService};
use super::payments::{CallbackOutcome, CheckoutOutcome, PaymentService, WebhookOutcome};
use super::refunds::{RefundOutcome, RefundService};
use super::sweeper::{FinishSweep, LifecycleSweeper, SweepReport, UnderpopulatedSweep};
use crate::config::BookingConfig;
use crate::domain::audit::Actor;
use crate::domain::booking::Booking;
use crate::domain::event::{Event, EventDetails};
use crate::domain::ids::{BookingId, EventId, UserId, VenueId};
use crate::domain::payment::Payment;
use crate::domain::ports::{AuditSinkRef, ClockRef, GatewayRef, StoreRef};
use crate::domain::venue::Venue;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// The main entry point for the booking lifecycle.
///
/// `BookingEngine` owns the shared context (store, gateway, clock, audit sink,
/// configuration and row locks) and exposes every operation of the booking,
/// event, payment and refund state machines, plus the sweeper entry points.
/// It is cheap to share behind an `Arc` and safe to call concurrently.
pub struct BookingEngine {
    ctx: Arc<Context>,
    capacity: CapacityCalculator,
    bookings: BookingService,
    events: EventService,
    payments: PaymentService,
    refunds: RefundService,
    sweeper: LifecycleSweeper,
}

impl BookingEngine {
    /// Creates a new `BookingEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for venues, events, bookings and payments.
    /// * `gateway` - The card-processing gateway.
    /// * `clock` - Source of "now" for every deadline and TTL.
    /// * `audit` - Receives one record per committed transition.
    /// * `config` - Booking policy.
    pub fn new(
        store: StoreRef,
        gateway: GatewayRef,
        clock: ClockRef,
        audit: AuditSinkRef,
        config: BookingConfig,
    ) -> Self {
        let ctx = Arc::new(Context::new(store, gateway, clock, audit, config));
        Self {
            capacity: CapacityCalculator::new(ctx.clone()),
            bookings: BookingService::new(ctx.clone()),
            events: EventService::new(ctx.clone()),
            payments: PaymentService::new(ctx.clone()),
            refunds: RefundService::new(ctx.clone()),
            sweeper: LifecycleSweeper::new(ctx.clone()),
            ctx,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        self.ctx.config()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    // Venues

    pub async fn register_venue(&self, name: &str, capacity: u32) -> Result<Venue> {
        if name.trim().is_empty() {
            return Err(BookingError::ValidationError(
                "venue name is required".to_string(),
            ));
        }
        let venue = Venue {
            id: VenueId(self.ctx.store.next_id().await?),
            name: name.to_string(),
            capacity,
            active: true,
        };
        let mut uow = self.ctx.unit_of_work(Actor::System);
        uow.put_venue(venue.clone());
        self.ctx.commit(uow).await?;
        tracing::info!(venue = %venue.id, capacity, "Venue registered");
        Ok(venue)
    }

    pub async fn available_capacity(
        &self,
        venue: VenueId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        exclude_event: Option<EventId>,
    ) -> Result<u32> {
        let venue = self.ctx.load_venue(venue).await?;
        self.capacity
            .available_capacity(&venue, window_start, window_end, exclude_event)
            .await
    }

    // Events

    pub async fn create_event(
        &self,
        organizer: UserId,
        venue: VenueId,
        details: EventDetails,
    ) -> Result<(Event, Booking)> {
        self.events.create(organizer, venue, details).await
    }

    pub async fn reschedule_event(
        &self,
        event: EventId,
        new_start: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Event> {
        self.events.reschedule(event, new_start, actor).await
    }

    pub async fn cancel_event(
        &self,
        event: EventId,
        actor: Actor,
        system_override: bool,
    ) -> Result<EventCancellation> {
        self.events.cancel(event, actor, system_override).await
    }

    // Bookings

    pub async fn create_booking(
        &self,
        user: UserId,
        event: EventId,
        quantity: u32,
    ) -> Result<Booking> {
        self.bookings.create(user, event, quantity).await
    }

    pub async fn confirm_booking(
        &self,
        booking: BookingId,
        payment_reference: Option<String>,
        source: ConfirmationSource,
    ) -> Result<Confirmation> {
        self.bookings
            .confirm(booking, payment_reference, source)
            .await
    }

    pub async fn cancel_booking(
        &self,
        booking: BookingId,
        actor: Actor,
        system_override: bool,
    ) -> Result<Cancellation> {
        self.bookings
            .cancel(booking, actor, system_override)
            .await
    }

    // Payments

    pub async fn create_payment_session(
        &self,
        booking: BookingId,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutOutcome> {
        self.payments
            .create_session(booking, success_url, cancel_url)
            .await
    }

    pub async fn confirm_from_callback(
        &self,
        booking_public_id: Uuid,
        session_id: Option<&str>,
        payment_intent: Option<&str>,
        raw: Option<Value>,
    ) -> Result<CallbackOutcome> {
        self.payments
            .confirm_from_callback(booking_public_id, session_id, payment_intent, raw)
            .await
    }

    pub async fn mark_payment_failed(&self, payment_intent: &str) -> Result<usize> {
        self.payments.mark_failed(payment_intent).await
    }

    pub async fn mark_intent_canceled(&self, payment_intent: &str) -> Result<usize> {
        self.payments.mark_intent_canceled(payment_intent).await
    }

    pub async fn mark_session_canceled(&self, session_id: &str) -> Result<usize> {
        self.payments.mark_session_canceled(session_id).await
    }

    pub async fn handle_webhook(&self, raw: Value) -> Result<WebhookOutcome> {
        self.payments.handle_webhook(raw).await
    }

    // Refunds

    pub async fn process_refund(&self, booking: BookingId, actor: Actor) -> Result<RefundOutcome> {
        self.refunds.process_refund(booking, actor).await
    }

    pub async fn process_emergency_refund(
        &self,
        booking: BookingId,
        payment_intent: &str,
        reason: &str,
    ) -> RefundOutcome {
        self.refunds
            .process_emergency_refund(booking, payment_intent, reason)
            .await
    }

    // Sweeper

    pub async fn expire_pending_bookings(&self) -> Result<usize> {
        self.sweeper.expire_pending_bookings().await
    }

    pub async fn cancel_underpopulated_events(&self) -> Result<UnderpopulatedSweep> {
        self.sweeper.cancel_underpopulated_events().await
    }

    pub async fn finish_past_events(&self) -> Result<FinishSweep> {
        self.sweeper.finish_past_events().await
    }

    pub async fn run_sweep(&self) -> Result<SweepReport> {
        self.sweeper.run_once().await
    }

    // Queries

    pub async fn venue(&self, id: VenueId) -> Result<Venue> {
        self.ctx.load_venue(id).await
    }

    pub async fn event(&self, id: EventId) -> Result<Event> {
        self.ctx.load_event(id).await
    }

    pub async fn booking(&self, id: BookingId) -> Result<Booking> {
        self.ctx.load_booking(id).await
    }

    pub async fn booking_by_public_id(&self, public_id: Uuid) -> Result<Booking> {
        self.ctx
            .store
            .booking_by_public_id(public_id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("booking {public_id}")))
    }

    pub async fn bookings_for_event(&self, event: EventId) -> Result<Vec<Booking>> {
        self.ctx.store.bookings_for_event(event).await
    }

    pub async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>> {
        self.ctx.store.payments_for_booking(booking).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditEvent;
    use crate::domain::booking::BookingStatus;
    use crate::domain::event::{Difficulty, EventStatus};
    use crate::domain::payment::PaymentStatus;
    use crate::error::StateConflict;
    use crate::infrastructure::audit::InMemoryAuditSink;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::gateway::MockPaymentGateway;
    use crate::infrastructure::in_memory::InMemoryStore;
    use chrono::{Duration, TimeZone};

    struct Harness {
        engine: BookingEngine,
        clock: Arc<ManualClock>,
        gateway: MockPaymentGateway,
        audit: InMemoryAuditSink,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
        ));
        let gateway = MockPaymentGateway::new();
        let audit = InMemoryAuditSink::new();
        let engine = BookingEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(gateway.clone()),
            clock.clone(),
            Arc::new(audit.clone()),
            BookingConfig::default(),
        );
        Harness {
            engine,
            clock,
            gateway,
            audit,
        }
    }

    fn details(price: i64) -> EventDetails {
        EventDetails {
            language: "german".to_string(),
            theme: "food".to_string(),
            difficulty: Difficulty::Beginner,
            start: Utc.with_ymd_and_hms(2026, 3, 4, 18, 0, 0).unwrap(),
            price,
        }
    }

    async fn published_event(h: &Harness, price: i64) -> Event {
        let venue = h.engine.register_venue("Cafe", 10).await.unwrap();
        let (event, organizer_booking) = h
            .engine
            .create_event(UserId(1), venue.id, details(price))
            .await
            .unwrap();
        h.engine
            .confirm_booking(organizer_booking.id, None, ConfirmationSource::Direct)
            .await
            .unwrap();
        h.engine.event(event.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_pending_booking_is_reused() {
        let h = harness();
        let event = published_event(&h, 1500).await;

        let first = h.engine.create_booking(UserId(2), event.id, 1).await.unwrap();
        h.clock.advance(Duration::minutes(10));
        let second = h.engine.create_booking(UserId(2), event.id, 1).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.expires_at, h.engine.now() + Duration::minutes(15));
        assert!(
            h.audit
                .events()
                .iter()
                .any(|e| matches!(e, AuditEvent::BookingRenewed { .. }))
        );
    }

    #[tokio::test]
    async fn test_confirmed_booking_blocks_rebooking() {
        let h = harness();
        let event = published_event(&h, 1500).await;
        let booking = h.engine.create_booking(UserId(2), event.id, 1).await.unwrap();
        h.engine
            .confirm_booking(booking.id, None, ConfirmationSource::Direct)
            .await
            .unwrap();

        let err = h
            .engine
            .create_booking(UserId(2), event.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::StateConflict(StateConflict::AlreadyBooked)
        ));
    }

    #[tokio::test]
    async fn test_organizer_confirmation_publishes_event() {
        let h = harness();
        let event = published_event(&h, 1500).await;
        assert_eq!(event.status, EventStatus::Published);
        assert!(event.published_at.is_some());
    }

    #[tokio::test]
    async fn test_free_checkout_confirms_without_gateway() {
        let h = harness();
        let event = published_event(&h, 0).await;
        let booking = h.engine.create_booking(UserId(2), event.id, 1).await.unwrap();

        let checkout = h
            .engine
            .create_payment_session(booking.id, "https://ok", "https://ko")
            .await
            .unwrap();

        assert!(checkout.redirect_url.is_none());
        assert_eq!(checkout.payment.status, PaymentStatus::Succeeded);
        assert_eq!(checkout.booking.status, BookingStatus::Confirmed);
        assert!(h.gateway.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_organizer_checkout_marks_event_pending_confirmation() {
        let h = harness();
        let venue = h.engine.register_venue("Cafe", 10).await.unwrap();
        let (event, organizer_booking) = h
            .engine
            .create_event(UserId(1), venue.id, details(1500))
            .await
            .unwrap();

        let checkout = h
            .engine
            .create_payment_session(organizer_booking.id, "https://ok", "https://ko")
            .await
            .unwrap();
        assert!(checkout.redirect_url.is_some());
        assert_eq!(
            h.engine.event(event.id).await.unwrap().status,
            EventStatus::PendingConfirmation
        );
    }

    #[tokio::test]
    async fn test_register_venue_rejects_blank_name() {
        let h = harness();
        assert!(matches!(
            h.engine.register_venue("  ", 10).await,
            Err(BookingError::ValidationError(_))
        ));
    }
}
