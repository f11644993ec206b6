//! Periodic maintenance driven by an external scheduler.

use super::context::Context;
use super::events::{EventCancellation, EventService};
use crate::domain::audit::{Actor, AuditEvent};
use crate::domain::booking::BookingStatus;
use crate::domain::event::EventStatus;
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub bookings_expired: usize,
    pub events_cancelled: usize,
    pub bookings_cancelled: usize,
    pub refunds_issued: usize,
    pub events_finished: usize,
    pub failures: usize,
    pub locks_pruned: usize,
}

/// Events force-cancelled by one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnderpopulatedSweep {
    pub cancelled: Vec<EventCancellation>,
    pub failures: usize,
}

/// Events moved to FINISHED by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishSweep {
    pub finished: usize,
    pub failures: usize,
}

pub struct LifecycleSweeper {
    ctx: Arc<Context>,
}

impl LifecycleSweeper {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn events(&self) -> EventService {
        EventService::new(self.ctx.clone())
    }

    /// Cancels every PENDING booking whose reservation window has closed.
    pub async fn expire_pending_bookings(&self) -> Result<usize> {
        let now = self.ctx.now();
        let candidates = self.ctx.store.expired_pending_bookings(now).await?;
        let mut expired = 0;
        for candidate in candidates {
            let _guard = self
                .ctx
                .locks
                .acquire_pair(candidate.event, candidate.id)
                .await;
            let mut booking = match self.ctx.load_booking(candidate.id).await {
                Ok(booking) => booking,
                Err(e) => {
                    warn!(booking = %candidate.public_id, error = %e, "Could not reload booking for expiry");
                    continue;
                }
            };
            if booking.status != BookingStatus::Pending || !booking.is_expired_at(now) {
                debug!(booking = %booking.public_id, "Booking changed before expiry; skipping");
                continue;
            }

            booking.status = BookingStatus::Cancelled;
            booking.cancelled_at = Some(now);
            let mut uow = self.ctx.unit_of_work(Actor::System);
            uow.put_booking(booking.clone());
            uow.record(AuditEvent::BookingExpired {
                booking: booking.public_id,
                event: booking.event,
            });
            match self.ctx.commit(uow).await {
                Ok(()) => {
                    info!(booking = %booking.public_id, "Pending booking expired");
                    expired += 1;
                }
                Err(e) => warn!(booking = %booking.public_id, error = %e, "Failed to expire booking"),
            }
        }
        Ok(expired)
    }

    /// Force-cancels published events about to start without enough
    /// confirmed participants.
    pub async fn cancel_underpopulated_events(&self) -> Result<UnderpopulatedSweep> {
        let now = self.ctx.now();
        let events = self.events();
        let mut sweep = UnderpopulatedSweep::default();
        for event in self.ctx.store.events_with_status(EventStatus::Published).await? {
            match events.is_underpopulated(&event, now).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(event = %event.id, error = %e, "Could not evaluate event attendance");
                    sweep.failures += 1;
                    continue;
                }
            }
            match events.cancel_if_underpopulated(event.id).await {
                Ok(Some(cancellation)) => {
                    info!(event = %event.id, "Under-populated event cancelled");
                    sweep.failures += cancellation.failures;
                    sweep.cancelled.push(cancellation);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(event = %event.id, error = %e, "Failed to cancel under-populated event");
                    sweep.failures += 1;
                }
            }
        }
        Ok(sweep)
    }

    /// Marks published events whose slot has ended as FINISHED.
    pub async fn finish_past_events(&self) -> Result<FinishSweep> {
        let events = self.events();
        let mut sweep = FinishSweep::default();
        for event in self.ctx.store.events_with_status(EventStatus::Published).await? {
            match events.finish(event.id).await {
                Ok(true) => sweep.finished += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(event = %event.id, error = %e, "Failed to finish event");
                    sweep.failures += 1;
                }
            }
        }
        Ok(sweep)
    }

    /// Runs every sweep once, in order: expiry, auto-cancellation, finishing.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let bookings_expired = self.expire_pending_bookings().await?;
        let underpopulated = self.cancel_underpopulated_events().await?;
        let finished = self.finish_past_events().await?;
        let locks_pruned = self.ctx.locks.prune();

        let report = SweepReport {
            bookings_expired,
            events_cancelled: underpopulated.cancelled.len(),
            bookings_cancelled: underpopulated
                .cancelled
                .iter()
                .map(|c| c.bookings_cancelled)
                .sum(),
            refunds_issued: underpopulated
                .cancelled
                .iter()
                .map(|c| c.refunds_issued)
                .sum(),
            events_finished: finished.finished,
            failures: underpopulated.failures + finished.failures,
            locks_pruned,
        };
        info!(?report, "Sweep finished");
        Ok(report)
    }
}
