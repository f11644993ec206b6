use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

record_id!(
    /// Internal venue (partner) identifier.
    VenueId
);
record_id!(EventId);
record_id!(
    /// Internal booking identifier. Never exposed outside the core; use
    /// `Booking::public_id` across the gateway boundary.
    BookingId
);
record_id!(PaymentId);
record_id!(UserId);
