use super::booking::{Booking, BookingStatus};
use super::event::Event;
use super::payment::Payment;
use super::venue::Venue;

/// Rows written by one operation, applied atomically by `Store::commit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub venues: Vec<Venue>,
    pub events: Vec<Event>,
    pub bookings: Vec<Booking>,
    pub payments: Vec<Payment>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
            && self.events.is_empty()
            && self.bookings.is_empty()
            && self.payments.is_empty()
    }

    /// Finds a staged PENDING booking that would coexist with another PENDING
    /// booking for the same `(user, event)` once this changeset is applied.
    ///
    /// `stored` is the current content of the booking table (or the subset
    /// sharing a pair with a staged booking). Stored rows replaced by this
    /// changeset are judged by their staged version.
    pub fn pending_conflict(&self, stored: &[&Booking]) -> Option<&Booking> {
        let is_staged = |id| self.bookings.iter().any(|b| b.id == id);
        self.bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Pending)
            .find(|b| {
                let same_pair = |o: &Booking| {
                    o.id != b.id
                        && o.status == BookingStatus::Pending
                        && o.user == b.user
                        && o.event == b.event
                };
                self.bookings.iter().any(same_pair)
                    || stored
                        .iter()
                        .copied()
                        .any(|o| !is_staged(o.id) && same_pair(o))
            })
    }
}
