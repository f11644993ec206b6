use super::booking::BookingStatus;
use super::ids::{EventId, PaymentId, UserId, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Admin(UserId),
    /// Sweeper and webhook-driven transitions.
    System,
}

impl Actor {
    /// Admins and the system may act on any resource; users only on their own.
    pub fn may_act_for(&self, owner: UserId) -> bool {
        match self {
            Self::User(user) => *user == owner,
            Self::Admin(_) | Self::System => true,
        }
    }
}

/// One significant transition, emitted after its unit of work commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    BookingCreated {
        booking: Uuid,
        event: EventId,
        user: UserId,
        amount: i64,
    },
    BookingRenewed {
        booking: Uuid,
        expires_at: DateTime<Utc>,
    },
    BookingConfirmed {
        booking: Uuid,
        event: EventId,
        amount: i64,
        confirmed_after_expiry: bool,
    },
    BookingCancelled {
        booking: Uuid,
        event: EventId,
        previous: BookingStatus,
    },
    BookingExpired {
        booking: Uuid,
        event: EventId,
    },
    PaymentCreated {
        payment: PaymentId,
        booking: Uuid,
        amount: i64,
    },
    PaymentSucceeded {
        payment: PaymentId,
        booking: Uuid,
        amount: i64,
    },
    PaymentFailed {
        payment: PaymentId,
        booking: Uuid,
    },
    PaymentCanceled {
        payment: PaymentId,
        booking: Uuid,
    },
    PaymentRefunded {
        payment: PaymentId,
        booking: Uuid,
        amount: i64,
        emergency: bool,
    },
    EventCreated {
        event: EventId,
        venue: VenueId,
        organizer: UserId,
        price: i64,
    },
    EventPublished {
        event: EventId,
    },
    EventRescheduled {
        event: EventId,
        start: DateTime<Utc>,
    },
    EventCancelled {
        event: EventId,
    },
    EventFinished {
        event: EventId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub event: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_ownership() {
        let owner = UserId(4);
        assert!(Actor::User(owner).may_act_for(owner));
        assert!(!Actor::User(UserId(5)).may_act_for(owner));
        assert!(Actor::Admin(UserId(9)).may_act_for(owner));
        assert!(Actor::System.may_act_for(owner));
    }

    #[test]
    fn test_audit_event_is_tagged() {
        let json = serde_json::to_value(AuditEvent::EventPublished { event: EventId(3) }).unwrap();
        assert_eq!(json["type"], "event_published");
        assert_eq!(json["event"], 3);
    }
}
