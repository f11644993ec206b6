use super::ids::{BookingId, EventId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A seat reservation for one user at one event.
///
/// At most one PENDING booking may exist per `(user, event)`; the store
/// rejects a commit that would break this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    /// The only booking identifier shared with the gateway and end users.
    pub public_id: Uuid,
    pub user: UserId,
    pub event: EventId,
    pub status: BookingStatus,
    pub quantity: u32,
    /// Total in minor currency units (`price * quantity`).
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set when a succeeded payment confirmed the booking after its TTL lapsed.
    #[serde(default)]
    pub confirmed_after_expiry: bool,
    pub payment_reference: Option<String>,
}

impl Booking {
    /// Expiry is inclusive: a booking whose `expires_at` equals `now` is expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}
