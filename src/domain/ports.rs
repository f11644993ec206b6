use super::audit::AuditRecord;
use super::booking::Booking;
use super::changeset::Changeset;
use super::event::{Event, EventStatus};
use super::gateway::{CheckoutRequest, CheckoutSession, GatewayRefund};
use super::ids::{BookingId, EventId, PaymentId, UserId, VenueId};
use super::payment::Payment;
use super::venue::Venue;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Persistence for venues, events, bookings and payments.
///
/// Reads return snapshots; all writes go through [`Store::commit`], which must
/// apply a changeset atomically and reject it with an integrity error if it
/// would leave two PENDING bookings for the same `(user, event)`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Allocates a fresh internal id, unique across all tables.
    async fn next_id(&self) -> Result<u64>;
    async fn venue(&self, id: VenueId) -> Result<Option<Venue>>;
    async fn event(&self, id: EventId) -> Result<Option<Event>>;
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>>;
    async fn booking_by_public_id(&self, public_id: Uuid) -> Result<Option<Booking>>;
    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn events_at_venue(&self, venue: VenueId) -> Result<Vec<Event>>;
    async fn events_with_status(&self, status: EventStatus) -> Result<Vec<Event>>;
    async fn bookings_for_event(&self, event: EventId) -> Result<Vec<Booking>>;
    async fn bookings_for_user(&self, user: UserId, event: EventId) -> Result<Vec<Booking>>;
    async fn expired_pending_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>>;
    /// Payment rows of a booking, oldest first.
    async fn payments_for_booking(&self, booking: BookingId) -> Result<Vec<Payment>>;
    async fn payments_by_session(&self, session_id: &str) -> Result<Vec<Payment>>;
    async fn payments_by_intent(&self, payment_intent: &str) -> Result<Vec<Payment>>;
    async fn commit(&self, changes: Changeset) -> Result<()>;
}

/// The external card-processing gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> std::result::Result<CheckoutSession, GatewayError>;

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount: i64,
        currency: &str,
    ) -> std::result::Result<GatewayRefund, GatewayError>;

    async fn cancel_payment_intent(
        &self,
        payment_intent: &str,
    ) -> std::result::Result<(), GatewayError>;
}

/// Receives one record per committed transition. Storage and retention are
/// the sink's business.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type StoreRef = Arc<dyn Store>;
pub type GatewayRef = Arc<dyn PaymentGateway>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
pub type ClockRef = Arc<dyn Clock>;
