use crate::domain::audit::{Actor, AuditEvent};
use crate::domain::booking::Booking;
use crate::domain::changeset::Changeset;
use crate::domain::event::Event;
use crate::domain::payment::Payment;
use crate::domain::venue::Venue;

/// Writes and audit records staged by one operation.
///
/// Nothing reaches the store until `Context::commit`; dropping a unit of work
/// discards it, which is how a failed step rolls back the whole call.
#[derive(Debug)]
pub(crate) struct UnitOfWork {
    pub(crate) actor: Actor,
    pub(crate) changes: Changeset,
    pub(crate) audit: Vec<AuditEvent>,
}

impl UnitOfWork {
    pub(crate) fn new(actor: Actor) -> Self {
        Self {
            actor,
            changes: Changeset::default(),
            audit: Vec::new(),
        }
    }

    pub(crate) fn put_venue(&mut self, venue: Venue) {
        upsert(&mut self.changes.venues, venue, |v| v.id);
    }

    pub(crate) fn put_event(&mut self, event: Event) {
        upsert(&mut self.changes.events, event, |e| e.id);
    }

    pub(crate) fn put_booking(&mut self, booking: Booking) {
        upsert(&mut self.changes.bookings, booking, |b| b.id);
    }

    pub(crate) fn put_payment(&mut self, payment: Payment) {
        upsert(&mut self.changes.payments, payment, |p| p.id);
    }

    pub(crate) fn record(&mut self, event: AuditEvent) {
        self.audit.push(event);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.audit.is_empty()
    }
}

fn upsert<T, K: PartialEq>(rows: &mut Vec<T>, row: T, key: impl Fn(&T) -> K) {
    let id = key(&row);
    match rows.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::VenueId;

    #[test]
    fn test_staging_same_row_twice_keeps_latest() {
        let mut uow = UnitOfWork::new(Actor::System);
        let venue = Venue {
            id: VenueId(1),
            name: "Cafe".to_string(),
            capacity: 10,
            active: true,
        };
        uow.put_venue(venue.clone());
        uow.put_venue(Venue {
            capacity: 12,
            ..venue
        });
        assert_eq!(uow.changes.venues.len(), 1);
        assert_eq!(uow.changes.venues[0].capacity, 12);
        assert!(!uow.is_empty());
    }
}
