//! Event state machine: DRAFT → PENDING_CONFIRMATION → PUBLISHED → FINISHED,
//! with CANCELLED reachable from every open state.

use super::bookings::{BookingService, ensure_before_deadline, new_pending_booking};
use super::capacity::CapacityCalculator;
use super::context::Context;
use super::locks::LockKey;
use crate::domain::audit::{Actor, AuditEvent};
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::event::{Event, EventDetails, EventStatus};
use crate::domain::ids::{EventId, UserId, VenueId};
use crate::error::{BookingError, Result, StateConflict};
use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Summary of an event cancellation and its booking cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCancellation {
    pub event: Event,
    pub bookings_cancelled: usize,
    pub refunds_issued: usize,
    /// Bookings whose cancellation failed; they are left as they were.
    pub failures: usize,
}

pub struct EventService {
    ctx: Arc<Context>,
}

impl EventService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn capacity(&self) -> CapacityCalculator {
        CapacityCalculator::new(self.ctx.clone())
    }

    /// Creates a DRAFT event together with the organizer's PENDING booking.
    pub async fn create(
        &self,
        organizer: UserId,
        venue_id: VenueId,
        details: EventDetails,
    ) -> Result<(Event, Booking)> {
        if details.price < 0 {
            return Err(BookingError::ValidationError(
                "price cannot be negative".to_string(),
            ));
        }
        if details.language.trim().is_empty() {
            return Err(BookingError::ValidationError(
                "language is required".to_string(),
            ));
        }
        let now = self.ctx.now();
        self.validate_start(details.start, now)?;

        let _venue_guard = self.ctx.locks.acquire(LockKey::Venue(venue_id)).await;
        let venue = self.ctx.load_venue(venue_id).await?;
        if !venue.active {
            return Err(BookingError::ValidationError(format!(
                "venue {} is not accepting events",
                venue.id
            )));
        }
        let available = self
            .capacity()
            .ensure_slot(
                &venue,
                details.start,
                None,
                self.ctx.config.min_available_seats,
            )
            .await?;

        let event = Event {
            id: EventId(self.ctx.store.next_id().await?),
            organizer,
            venue: venue.id,
            language: details.language,
            theme: details.theme,
            difficulty: details.difficulty,
            start: details.start,
            price: details.price,
            max_seats: available.min(self.ctx.config.default_event_seats),
            status: EventStatus::Draft,
            created_at: now,
            published_at: None,
            cancelled_at: None,
            finished_at: None,
        };
        let booking = new_pending_booking(&self.ctx, &event, organizer, 1, now).await?;

        let mut uow = self.ctx.unit_of_work(Actor::User(organizer));
        uow.put_event(event.clone());
        uow.put_booking(booking.clone());
        uow.record(AuditEvent::EventCreated {
            event: event.id,
            venue: venue.id,
            organizer,
            price: event.price,
        });
        uow.record(AuditEvent::BookingCreated {
            booking: booking.public_id,
            event: event.id,
            user: organizer,
            amount: booking.amount,
        });
        self.ctx.commit(uow).await?;

        info!(event = %event.id, venue = %venue.id, organizer = %organizer, seats = event.max_seats, start = %event.start, "Event created");
        Ok((event, booking))
    }

    /// Start must fall between the minimum and maximum lead times, within the
    /// daily window (the closing hour itself is allowed only on the hour).
    fn validate_start(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let config = &self.ctx.config;
        let lead = start - now;
        if lead < config.min_lead() {
            return Err(BookingError::ValidationError(format!(
                "events must be scheduled at least {} hours ahead",
                config.min_lead_hours
            )));
        }
        if lead > config.max_lead() {
            return Err(BookingError::ValidationError(format!(
                "events cannot be scheduled more than {} days ahead",
                config.max_lead_days
            )));
        }
        let hour = start.hour();
        let on_the_hour = start.minute() == 0 && start.second() == 0 && start.nanosecond() == 0;
        let in_window = (config.earliest_start_hour..config.latest_start_hour).contains(&hour)
            || (hour == config.latest_start_hour && on_the_hour);
        if !in_window {
            return Err(BookingError::ValidationError(format!(
                "events must start between {}:00 and {}:00",
                config.earliest_start_hour, config.latest_start_hour
            )));
        }
        Ok(())
    }

    /// Moves an open event to a new start. The allotment may shrink to what
    /// the new slot offers but never below the seats already confirmed.
    pub async fn reschedule(
        &self,
        event_id: EventId,
        new_start: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Event> {
        let venue_id = self.ctx.load_event(event_id).await?.venue;
        let _venue_guard = self.ctx.locks.acquire(LockKey::Venue(venue_id)).await;
        let _event_guard = self.ctx.locks.acquire(LockKey::Event(event_id)).await;
        let mut event = self.ctx.load_event(event_id).await?;
        ensure_organizer(&event, actor)?;

        if !event.status.holds_allotment() {
            return Err(StateConflict::InvalidTransition {
                action: "reschedule",
                event: event.id,
                status: event.status.to_string(),
            }
            .into());
        }
        let now = self.ctx.now();
        if event.status == EventStatus::Published {
            ensure_before_deadline(
                event.start,
                now,
                self.ctx.config.cancellation_deadline(),
                "rescheduling",
            )?;
        }
        self.validate_start(new_start, now)?;

        let confirmed: u32 = self
            .ctx
            .store
            .bookings_for_event(event.id)
            .await?
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .map(|b| b.quantity)
            .sum();
        let threshold = confirmed.max(self.ctx.config.reschedule_min_seats);
        let venue = self.ctx.load_venue(event.venue).await?;
        let available = self
            .capacity()
            .ensure_slot(&venue, new_start, Some(event.id), threshold)
            .await?;

        event.start = new_start;
        event.max_seats = event.max_seats.min(available);
        let mut uow = self.ctx.unit_of_work(actor);
        uow.put_event(event.clone());
        uow.record(AuditEvent::EventRescheduled {
            event: event.id,
            start: new_start,
        });
        self.ctx.commit(uow).await?;

        info!(event = %event.id, start = %event.start, seats = event.max_seats, "Event rescheduled");
        Ok(event)
    }

    /// Cancels an event, then cancels (and refunds) each of its bookings one
    /// by one. Individual booking failures are counted, not raised.
    pub async fn cancel(
        &self,
        event_id: EventId,
        actor: Actor,
        system_override: bool,
    ) -> Result<EventCancellation> {
        let event = self.close(event_id, actor, system_override, false).await?;
        match event {
            Some(event) => Ok(self.cascade(event).await),
            None => Err(BookingError::IntegrityError(format!(
                "event {event_id} was not closed"
            ))),
        }
    }

    /// Force-cancels a published event starting within the auto-cancel horizon
    /// that has too few confirmed participants. Returns `None` when the event
    /// no longer qualifies.
    pub async fn cancel_if_underpopulated(
        &self,
        event_id: EventId,
    ) -> Result<Option<EventCancellation>> {
        match self.close(event_id, Actor::System, true, true).await? {
            Some(event) => Ok(Some(self.cascade(event).await)),
            None => Ok(None),
        }
    }

    async fn close(
        &self,
        event_id: EventId,
        actor: Actor,
        system_override: bool,
        only_if_underpopulated: bool,
    ) -> Result<Option<Event>> {
        let _guard = self.ctx.locks.acquire(LockKey::Event(event_id)).await;
        let mut event = self.ctx.load_event(event_id).await?;
        ensure_organizer(&event, actor)?;
        let now = self.ctx.now();

        match event.status {
            EventStatus::Cancelled => {
                return Err(StateConflict::EventAlreadyCancelled(event.id).into());
            }
            EventStatus::Finished => {
                return Err(StateConflict::InvalidTransition {
                    action: "cancel",
                    event: event.id,
                    status: event.status.to_string(),
                }
                .into());
            }
            EventStatus::Published if !system_override => {
                ensure_before_deadline(
                    event.start,
                    now,
                    self.ctx.config.cancellation_deadline(),
                    "cancellation",
                )?;
            }
            _ => {}
        }

        if only_if_underpopulated && !self.is_underpopulated(&event, now).await? {
            return Ok(None);
        }

        event.status = EventStatus::Cancelled;
        event.cancelled_at = Some(now);
        let mut uow = self.ctx.unit_of_work(actor);
        uow.put_event(event.clone());
        uow.record(AuditEvent::EventCancelled { event: event.id });
        self.ctx.commit(uow).await?;

        info!(event = %event.id, ?actor, system_override, "Event cancelled");
        Ok(Some(event))
    }

    /// Whether a PUBLISHED event inside the auto-cancel horizon has fewer
    /// CONFIRMED bookings than `min_participants`. Bookings are counted, not
    /// seats: one booking for several seats is still one participant.
    pub(crate) async fn is_underpopulated(&self, event: &Event, now: DateTime<Utc>) -> Result<bool> {
        if event.status != EventStatus::Published {
            return Ok(false);
        }
        let horizon = now + self.ctx.config.auto_cancel_horizon();
        if !(now < event.start && event.start <= horizon) {
            return Ok(false);
        }
        let confirmed = self
            .ctx
            .store
            .bookings_for_event(event.id)
            .await?
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .count();
        Ok(confirmed < self.ctx.config.min_participants as usize)
    }

    async fn cascade(&self, event: Event) -> EventCancellation {
        let mut summary = EventCancellation {
            event,
            bookings_cancelled: 0,
            refunds_issued: 0,
            failures: 0,
        };
        let bookings = match self.ctx.store.bookings_for_event(summary.event.id).await {
            Ok(bookings) => bookings,
            Err(e) => {
                warn!(event = %summary.event.id, error = %e, "Could not list bookings of cancelled event");
                summary.failures += 1;
                return summary;
            }
        };

        let service = BookingService::new(self.ctx.clone());
        for booking in bookings.into_iter().filter(Booking::is_active) {
            match service.cancel(booking.id, Actor::System, true).await {
                Ok(cancellation) => {
                    if cancellation.changed {
                        summary.bookings_cancelled += 1;
                    }
                    if cancellation.refund.is_some_and(|r| r.refunded) {
                        summary.refunds_issued += 1;
                    }
                }
                Err(e) => {
                    warn!(event = %summary.event.id, booking = %booking.public_id, error = %e, "Booking cancellation failed during event cancellation");
                    summary.failures += 1;
                }
            }
        }
        info!(
            event = %summary.event.id,
            cancelled = summary.bookings_cancelled,
            refunded = summary.refunds_issued,
            failures = summary.failures,
            "Event cancellation cascade finished"
        );
        summary
    }

    /// Marks a published event FINISHED once its slot has ended. Returns
    /// whether the event changed.
    pub async fn finish(&self, event_id: EventId) -> Result<bool> {
        let _guard = self.ctx.locks.acquire(LockKey::Event(event_id)).await;
        let mut event = self.ctx.load_event(event_id).await?;
        let now = self.ctx.now();
        if event.status != EventStatus::Published
            || event.start + self.ctx.config.event_duration() > now
        {
            return Ok(false);
        }

        event.status = EventStatus::Finished;
        event.finished_at = Some(now);
        let mut uow = self.ctx.unit_of_work(Actor::System);
        uow.put_event(event.clone());
        uow.record(AuditEvent::EventFinished { event: event.id });
        self.ctx.commit(uow).await?;
        info!(event = %event.id, "Event finished");
        Ok(true)
    }
}

fn ensure_organizer(event: &Event, actor: Actor) -> Result<()> {
    if actor.may_act_for(event.organizer) {
        Ok(())
    } else {
        Err(BookingError::Forbidden(format!(
            "only the organizer may change event {}",
            event.id
        )))
    }
}
