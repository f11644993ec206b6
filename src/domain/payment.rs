use super::ids::{BookingId, PaymentId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

/// One charge attempt or one refund against a booking.
///
/// Rows are never rewritten into refunds: a refund is a separate row with a
/// negative `amount` (zero for free bookings) pointing at the charge through
/// `refund_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user: UserId,
    pub booking: BookingId,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub session_id: Option<String>,
    pub payment_intent: Option<String>,
    pub refund_id: Option<String>,
    pub refund_of: Option<PaymentId>,
    /// Last gateway event that touched this row, verbatim.
    pub raw_event: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_refund(&self) -> bool {
        self.amount < 0 || self.refund_of.is_some()
    }
}
