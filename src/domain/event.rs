use super::ids::{EventId, UserId, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    PendingConfirmation,
    Published,
    Cancelled,
    Finished,
}

impl EventStatus {
    /// Whether an event in this status still reserves its allotment at the venue.
    pub fn holds_allotment(self) -> bool {
        matches!(self, Self::Draft | Self::PendingConfirmation | Self::Published)
    }

    /// Whether the organizer has not paid yet.
    pub fn is_unpublished(self) -> bool {
        matches!(self, Self::Draft | Self::PendingConfirmation)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::PendingConfirmation => "pending_confirmation",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

/// Organizer-supplied data for a new event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    pub language: String,
    pub theme: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub start: DateTime<Utc>,
    /// Seat price in minor currency units.
    pub price: i64,
}

/// A one-hour language-exchange session at a venue.
///
/// `price` and the session length never change after creation. `max_seats`
/// is the allotment the event reserves from its venue regardless of how many
/// seats are booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub organizer: UserId,
    pub venue: VenueId,
    pub language: String,
    pub theme: String,
    pub difficulty: Difficulty,
    pub start: DateTime<Utc>,
    pub price: i64,
    pub max_seats: u32,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allotment_statuses() {
        assert!(EventStatus::Draft.holds_allotment());
        assert!(EventStatus::PendingConfirmation.holds_allotment());
        assert!(EventStatus::Published.holds_allotment());
        assert!(!EventStatus::Cancelled.holds_allotment());
        assert!(!EventStatus::Finished.holds_allotment());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&EventStatus::PendingConfirmation).unwrap();
        assert_eq!(json, "\"pending_confirmation\"");
        assert_eq!(EventStatus::Published.to_string(), "published");
    }
}
