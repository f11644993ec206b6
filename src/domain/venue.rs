use super::ids::VenueId;
use serde::{Deserialize, Serialize};

/// A partner venue hosting events.
///
/// `capacity` is the hard ceiling on seats reserved by all active events that
/// overlap in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
    pub capacity: u32,
    pub active: bool,
}
