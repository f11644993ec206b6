//! Booking state machine: PENDING → CONFIRMED | CANCELLED.

use super::capacity::{CapacityCalculator, SeatCheck};
use super::context::Context;
use super::locks::LockKey;
use super::refunds::{RefundOutcome, RefundPolicy, RefundService};
use super::unit_of_work::UnitOfWork;
use crate::domain::audit::{Actor, AuditEvent};
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::event::{Event, EventStatus};
use crate::domain::ids::{BookingId, EventId, UserId};
use crate::domain::payment::PaymentStatus;
use crate::error::{BookingError, Result, StateConflict};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What stands behind a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    /// No money moved through the gateway (free bookings, manual confirmation).
    Direct,
    /// The gateway already reported the payment as succeeded. Such bookings
    /// are honoured even if their reservation window lapsed.
    SucceededPayment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub booking: Booking,
    /// False when the booking was already confirmed.
    pub changed: bool,
    pub event_published: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub booking: Booking,
    /// False when the booking was already cancelled.
    pub changed: bool,
    pub refund: Option<RefundOutcome>,
}

/// Rejects unless `start - now` is strictly greater than `deadline`.
pub(crate) fn ensure_before_deadline(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    deadline: Duration,
    what: &str,
) -> Result<()> {
    if start - now > deadline {
        Ok(())
    } else {
        Err(BookingError::DeadlineError(format!(
            "{what} must happen more than {} minutes before the event starts",
            deadline.num_minutes()
        )))
    }
}

/// Builds a fresh PENDING booking for `user` at `event`'s price.
pub(crate) async fn new_pending_booking(
    ctx: &Context,
    event: &Event,
    user: UserId,
    quantity: u32,
    now: DateTime<Utc>,
) -> Result<Booking> {
    let amount = event
        .price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| BookingError::ValidationError("booking amount overflows".to_string()))?;
    Ok(Booking {
        id: BookingId(ctx.store.next_id().await?),
        public_id: Uuid::new_v4(),
        user,
        event: event.id,
        status: BookingStatus::Pending,
        quantity,
        amount,
        currency: ctx.config.currency.clone(),
        created_at: now,
        expires_at: now + ctx.config.booking_ttl(),
        confirmed_at: None,
        cancelled_at: None,
        confirmed_after_expiry: false,
        payment_reference: None,
    })
}

pub struct BookingService {
    ctx: Arc<Context>,
}

impl BookingService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn capacity(&self) -> CapacityCalculator {
        CapacityCalculator::new(self.ctx.clone())
    }

    fn refunds(&self) -> RefundService {
        RefundService::new(self.ctx.clone())
    }

    /// Creates a PENDING booking, or renews the caller's existing one.
    pub async fn create(&self, user: UserId, event_id: EventId, quantity: u32) -> Result<Booking> {
        if quantity == 0 {
            return Err(BookingError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let _event_guard = self.ctx.locks.acquire(LockKey::Event(event_id)).await;
        let event = self.ctx.load_event(event_id).await?;
        let now = self.ctx.now();

        let existing = self.ctx.store.bookings_for_user(user, event_id).await?;
        if existing.iter().any(|b| b.status == BookingStatus::Confirmed) {
            return Err(StateConflict::AlreadyBooked.into());
        }
        if let Some(pending) = existing.iter().find(|b| b.status == BookingStatus::Pending)
            && let Some(renewed) = self.renew(pending.id, user, now).await?
        {
            return Ok(renewed);
        }

        validate_bookable(&event, user, now)?;
        self.capacity()
            .ensure_seats(&event, quantity, SeatCheck::Admission)
            .await?;

        let booking = new_pending_booking(&self.ctx, &event, user, quantity, now).await?;
        let mut uow = self.ctx.unit_of_work(Actor::User(user));
        uow.put_booking(booking.clone());
        uow.record(AuditEvent::BookingCreated {
            booking: booking.public_id,
            event: event.id,
            user,
            amount: booking.amount,
        });
        self.ctx.commit(uow).await?;

        info!(booking = %booking.public_id, event = %event.id, user = %user, amount = booking.amount, "Booking created");
        Ok(booking)
    }

    /// Refreshes the TTL of a pending booking. Returns `None` if it stopped
    /// being pending before the lock was taken.
    async fn renew(&self, id: BookingId, user: UserId, now: DateTime<Utc>) -> Result<Option<Booking>> {
        let _guard = self.ctx.locks.acquire(LockKey::Booking(id)).await;
        let mut booking = self.ctx.load_booking(id).await?;
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => return Err(StateConflict::AlreadyBooked.into()),
            BookingStatus::Cancelled => return Ok(None),
        }

        booking.expires_at = now + self.ctx.config.booking_ttl();
        let mut uow = self.ctx.unit_of_work(Actor::User(user));
        uow.put_booking(booking.clone());
        uow.record(AuditEvent::BookingRenewed {
            booking: booking.public_id,
            expires_at: booking.expires_at,
        });
        self.ctx.commit(uow).await?;

        info!(booking = %booking.public_id, expires_at = %booking.expires_at, "Pending booking reused");
        Ok(Some(booking))
    }

    pub async fn confirm(
        &self,
        id: BookingId,
        payment_reference: Option<String>,
        source: ConfirmationSource,
    ) -> Result<Confirmation> {
        let event_id = self.ctx.load_booking(id).await?.event;
        let _guard = self.ctx.locks.acquire_pair(event_id, id).await;
        let booking = self.ctx.load_booking(id).await?;

        let mut uow = self.ctx.unit_of_work(Actor::System);
        let confirmation = self
            .stage_confirmation(&mut uow, booking, payment_reference, source)
            .await?;
        self.ctx.commit(uow).await?;
        Ok(confirmation)
    }

    /// Stages PENDING → CONFIRMED (and the organizer's event publication).
    /// The caller holds the event and booking locks.
    pub(crate) async fn stage_confirmation(
        &self,
        uow: &mut UnitOfWork,
        mut booking: Booking,
        payment_reference: Option<String>,
        source: ConfirmationSource,
    ) -> Result<Confirmation> {
        match booking.status {
            BookingStatus::Confirmed => {
                return Ok(Confirmation {
                    booking,
                    changed: false,
                    event_published: false,
                });
            }
            BookingStatus::Cancelled => {
                return Err(StateConflict::AlreadyCancelled(booking.public_id).into());
            }
            BookingStatus::Pending => {}
        }

        let now = self.ctx.now();
        let late = booking.is_expired_at(now);
        if late && source != ConfirmationSource::SucceededPayment {
            return Err(StateConflict::BookingExpired(booking.public_id).into());
        }

        let mut event = self.ctx.load_event(booking.event).await?;
        match event.status {
            EventStatus::Cancelled => {
                return Err(StateConflict::EventAlreadyCancelled(event.id).into());
            }
            EventStatus::Finished => {
                return Err(StateConflict::InvalidTransition {
                    action: "confirm a booking for",
                    event: event.id,
                    status: event.status.to_string(),
                }
                .into());
            }
            _ => {}
        }

        self.capacity()
            .ensure_seats(
                &event,
                booking.quantity,
                SeatCheck::Confirmation {
                    booking: booking.id,
                },
            )
            .await?;

        booking.status = BookingStatus::Confirmed;
        booking.confirmed_at = Some(now);
        booking.confirmed_after_expiry = late;
        if payment_reference.is_some() {
            booking.payment_reference = payment_reference;
        }
        uow.put_booking(booking.clone());
        uow.record(AuditEvent::BookingConfirmed {
            booking: booking.public_id,
            event: event.id,
            amount: booking.amount,
            confirmed_after_expiry: late,
        });
        if late {
            warn!(booking = %booking.public_id, "Payment succeeded after the reservation window lapsed; confirming anyway");
        }

        let mut event_published = false;
        if booking.user == event.organizer && event.status.is_unpublished() {
            event.status = EventStatus::Published;
            event.published_at = Some(now);
            uow.put_event(event.clone());
            uow.record(AuditEvent::EventPublished { event: event.id });
            event_published = true;
            info!(event = %event.id, "Event published");
        }

        info!(booking = %booking.public_id, amount = booking.amount, "Booking confirmed");
        Ok(Confirmation {
            booking,
            changed: true,
            event_published,
        })
    }

    pub async fn cancel(&self, id: BookingId, actor: Actor, system_override: bool) -> Result<Cancellation> {
        let event_id = self.ctx.load_booking(id).await?.event;
        let _guard = self.ctx.locks.acquire_pair(event_id, id).await;
        let booking = self.ctx.load_booking(id).await?;
        if !actor.may_act_for(booking.user) {
            return Err(BookingError::Forbidden(format!(
                "booking {} belongs to another user",
                booking.public_id
            )));
        }

        let mut uow = self.ctx.unit_of_work(actor);
        let cancellation = self
            .stage_cancellation(&mut uow, booking, system_override)
            .await?;
        self.ctx.commit(uow).await?;

        if cancellation.changed {
            info!(booking = %cancellation.booking.public_id, ?actor, system_override, "Booking cancelled");
        }
        Ok(cancellation)
    }

    /// Stages the cancellation of a booking, refunding it first when it was
    /// paid. A refund error aborts before anything is staged for the booking.
    pub(crate) async fn stage_cancellation(
        &self,
        uow: &mut UnitOfWork,
        mut booking: Booking,
        system_override: bool,
    ) -> Result<Cancellation> {
        let now = self.ctx.now();
        let mut refund = None;
        match booking.status {
            BookingStatus::Cancelled => {
                return Ok(Cancellation {
                    booking,
                    changed: false,
                    refund: None,
                });
            }
            BookingStatus::Pending => self.release_open_payments(uow, &booking).await?,
            BookingStatus::Confirmed => {
                let event = self.ctx.load_event(booking.event).await?;
                let policy = if system_override {
                    RefundPolicy::DeadlineWaived
                } else {
                    ensure_before_deadline(
                        event.start,
                        now,
                        self.ctx.config.cancellation_deadline(),
                        "cancellation",
                    )?;
                    RefundPolicy::Standard
                };
                refund = Some(
                    self.refunds()
                        .stage_refund(uow, &booking, &event, policy)
                        .await?,
                );
            }
        }

        let previous = booking.status;
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(now);
        uow.put_booking(booking.clone());
        uow.record(AuditEvent::BookingCancelled {
            booking: booking.public_id,
            event: booking.event,
            previous,
        });
        Ok(Cancellation {
            booking,
            changed: true,
            refund,
        })
    }

    /// Best-effort cancellation of checkout attempts still open at the gateway.
    async fn release_open_payments(&self, uow: &mut UnitOfWork, booking: &Booking) -> Result<()> {
        let payments = self.ctx.store.payments_for_booking(booking.id).await?;
        for mut payment in payments
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
        {
            let Some(intent) = payment.payment_intent.clone() else {
                continue;
            };
            match self
                .ctx
                .call_gateway(self.ctx.gateway.cancel_payment_intent(&intent))
                .await
            {
                Ok(()) => {
                    payment.status = PaymentStatus::Canceled;
                    uow.record(AuditEvent::PaymentCanceled {
                        payment: payment.id,
                        booking: booking.public_id,
                    });
                    uow.put_payment(payment);
                }
                Err(e) => {
                    warn!(booking = %booking.public_id, payment_intent = %intent, error = %e, "Could not cancel open payment intent");
                }
            }
        }
        Ok(())
    }
}

fn validate_bookable(event: &Event, user: UserId, now: DateTime<Utc>) -> Result<()> {
    match event.status {
        EventStatus::Cancelled => {
            return Err(StateConflict::EventAlreadyCancelled(event.id).into());
        }
        EventStatus::Finished => {
            return Err(BookingError::ValidationError(format!(
                "event {} has already finished",
                event.id
            )));
        }
        EventStatus::Published => {}
        EventStatus::Draft | EventStatus::PendingConfirmation => {
            if user != event.organizer {
                return Err(BookingError::ValidationError(format!(
                    "event {} is not open for booking yet",
                    event.id
                )));
            }
        }
    }
    if now >= event.start {
        return Err(BookingError::ValidationError(format!(
            "event {} has already started",
            event.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deadline_boundary() {
        let start = Utc.with_ymd_and_hms(2026, 3, 4, 18, 0, 0).unwrap();
        let deadline = Duration::hours(3);

        let exactly = start - Duration::hours(3);
        assert!(matches!(
            ensure_before_deadline(start, exactly, deadline, "cancellation"),
            Err(BookingError::DeadlineError(_))
        ));

        let one_second_earlier = exactly - Duration::seconds(1);
        assert!(ensure_before_deadline(start, one_second_earlier, deadline, "cancellation").is_ok());
    }
}
