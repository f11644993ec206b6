//! Venue capacity arbitration.
//!
//! Seats are reserved per event at creation time: every active event holds
//! its whole allotment (`max_seats`) at the venue for its one-hour slot, no
//! matter how many bookings it has. Bookings then draw from their event's
//! allotment.

use super::context::Context;
use crate::domain::booking::BookingStatus;
use crate::domain::event::Event;
use crate::domain::ids::{BookingId, EventId};
use crate::domain::venue::Venue;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Strict interval intersection of `[a_start, a_end)` and `[b_start, b_end)`.
/// Touching endpoints do not overlap.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Venue capacity left for a window once overlapping allotments are removed.
pub fn seats_left(
    venue: &Venue,
    events: &[Event],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    exclude: Option<EventId>,
    event_duration: Duration,
) -> u32 {
    let reserved: u64 = events
        .iter()
        .filter(|e| e.venue == venue.id && Some(e.id) != exclude)
        .filter(|e| e.status.holds_allotment())
        .filter(|e| overlaps(e.start, e.start + event_duration, window_start, window_end))
        .map(|e| u64::from(e.max_seats))
        .sum();
    let left = u64::from(venue.capacity).saturating_sub(reserved);
    u32::try_from(left).unwrap_or(venue.capacity)
}

/// Which bookings count against an event's seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatCheck {
    /// A new booking: confirmed plus unexpired pending bookings are held, and
    /// the slot must still offer the minimum viable audience.
    Admission,
    /// Confirming `booking`: only other confirmed bookings are held.
    Confirmation { booking: BookingId },
}

pub struct CapacityCalculator {
    ctx: Arc<Context>,
}

impl CapacityCalculator {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    pub async fn available_capacity(
        &self,
        venue: &Venue,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        exclude_event: Option<EventId>,
    ) -> Result<u32> {
        let events = self.ctx.store.events_at_venue(venue.id).await?;
        Ok(seats_left(
            venue,
            &events,
            window_start,
            window_end,
            exclude_event,
            self.ctx.config.event_duration(),
        ))
    }

    /// Checks that a one-hour slot starting at `start` leaves at least
    /// `threshold` seats, and returns how many it leaves.
    pub async fn ensure_slot(
        &self,
        venue: &Venue,
        start: DateTime<Utc>,
        exclude_event: Option<EventId>,
        threshold: u32,
    ) -> Result<u32> {
        let end = start + self.ctx.config.event_duration();
        let available = self
            .available_capacity(venue, start, end, exclude_event)
            .await?;
        if available < threshold {
            tracing::debug!(venue = %venue.id, available, threshold, "Slot rejected");
            return Err(BookingError::CapacityError {
                available,
                requested: threshold,
            });
        }
        Ok(available)
    }

    /// Checks that `quantity` more seats fit in `event`, returning the seats
    /// that were free before them.
    pub async fn ensure_seats(&self, event: &Event, quantity: u32, check: SeatCheck) -> Result<u32> {
        let venue = self.ctx.load_venue(event.venue).await?;
        let end = event.start + self.ctx.config.event_duration();
        let room = self
            .available_capacity(&venue, event.start, end, Some(event.id))
            .await?;
        let ceiling = room.min(event.max_seats);

        let minimum = self.ctx.config.min_available_seats;
        if check == SeatCheck::Admission && ceiling < minimum {
            return Err(BookingError::CapacityError {
                available: ceiling,
                requested: minimum,
            });
        }

        let now = self.ctx.now();
        let held: u64 = self
            .ctx
            .store
            .bookings_for_event(event.id)
            .await?
            .iter()
            .filter(|b| match check {
                SeatCheck::Admission => {
                    b.status == BookingStatus::Confirmed
                        || (b.status == BookingStatus::Pending && !b.is_expired_at(now))
                }
                SeatCheck::Confirmation { booking } => {
                    b.status == BookingStatus::Confirmed && b.id != booking
                }
            })
            .map(|b| u64::from(b.quantity))
            .sum();

        let remaining = u32::try_from(u64::from(ceiling).saturating_sub(held)).unwrap_or(0);
        if remaining < quantity {
            return Err(BookingError::CapacityError {
                available: remaining,
                requested: quantity,
            });
        }
        Ok(remaining)
    }
}
