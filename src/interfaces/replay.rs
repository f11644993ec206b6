//! Replays an operator command file against a [`BookingEngine`].
//!
//! The clock is driven by the `at` column and payments go through the mock
//! gateway, whose completions are fed back as webhook payloads.

use crate::application::engine::BookingEngine;
use crate::config::BookingConfig;
use crate::domain::audit::Actor;
use crate::domain::booking::Booking;
use crate::domain::event::EventDetails;
use crate::domain::gateway::BOOKING_METADATA_KEY;
use crate::domain::ids::{BookingId, EventId, UserId, VenueId};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::StoreRef;
use crate::error::{BookingError, Result};
use crate::infrastructure::audit::TracingAuditSink;
use crate::infrastructure::clock::ManualClock;
use crate::infrastructure::gateway::MockPaymentGateway;
use crate::interfaces::csv::command_reader::{CommandKind, CommandRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

const SUCCESS_URL: &str = "https://eventbook.local/checkout/success";
const CANCEL_URL: &str = "https://eventbook.local/checkout/cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Labelled {
    Venue(VenueId),
    Event(EventId),
    Booking(BookingId),
}

pub struct Replay {
    engine: BookingEngine,
    clock: Arc<ManualClock>,
    labels: Vec<(String, Labelled)>,
}

impl Replay {
    pub fn new(store: StoreRef, config: BookingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let engine = BookingEngine::new(
            store,
            Arc::new(MockPaymentGateway::new()),
            clock.clone(),
            Arc::new(TracingAuditSink),
            config,
        );
        Self {
            engine,
            clock,
            labels: Vec::new(),
        }
    }

    pub fn engine(&self) -> &BookingEngine {
        &self.engine
    }

    pub async fn apply(&mut self, record: CommandRecord) -> Result<()> {
        self.clock.set(record.at);
        match record.command {
            CommandKind::Venue => {
                let label = required(record.label.as_deref(), "ref")?;
                let name = record.target.as_deref().unwrap_or(label);
                let capacity = u32::try_from(required(record.amount, "amount")?).map_err(|_| {
                    BookingError::ValidationError("capacity must be a non-negative seat count".to_string())
                })?;
                let venue = self.engine.register_venue(name, capacity).await?;
                self.label(label, Labelled::Venue(venue.id))?;
            }
            CommandKind::Event => {
                let label = required(record.label.as_deref(), "ref")?;
                let venue = self.venue(required(record.target.as_deref(), "target")?)?;
                let details = EventDetails {
                    language: label.to_string(),
                    theme: label.to_string(),
                    difficulty: Default::default(),
                    start: required(record.start, "start")?,
                    price: record.amount.unwrap_or(0),
                };
                let (event, organizer_booking) = self
                    .engine
                    .create_event(user(&record)?, venue, details)
                    .await?;
                self.label(label, Labelled::Event(event.id))?;
                self.label(
                    &format!("{label}.organizer"),
                    Labelled::Booking(organizer_booking.id),
                )?;
            }
            CommandKind::Book => {
                let label = required(record.label.as_deref(), "ref")?;
                let event = self.event(required(record.target.as_deref(), "target")?)?;
                let quantity = u32::try_from(record.amount.unwrap_or(1)).map_err(|_| {
                    BookingError::ValidationError("quantity must be a positive seat count".to_string())
                })?;
                let booking = self
                    .engine
                    .create_booking(user(&record)?, event, quantity)
                    .await?;
                // Re-booking returns the existing pending booking under its first label.
                if !self.labels.iter().any(|(_, l)| *l == Labelled::Booking(booking.id)) {
                    self.label(label, Labelled::Booking(booking.id))?;
                }
            }
            CommandKind::Checkout => {
                let booking = self.booking(required(record.target.as_deref(), "target")?)?;
                self.engine
                    .create_payment_session(booking, SUCCESS_URL, CANCEL_URL)
                    .await?;
            }
            CommandKind::Pay => {
                let booking = self.booking(required(record.target.as_deref(), "target")?)?;
                let (booking, payment) = self.open_payment(booking).await?;
                let payload = json!({
                    "type": "checkout.session.completed",
                    "data": {"object": {
                        "id": payment.session_id,
                        "payment_intent": payment.payment_intent,
                        "metadata": {BOOKING_METADATA_KEY: booking.public_id.to_string()},
                    }},
                });
                let outcome = self.engine.handle_webhook(payload).await?;
                info!(booking = %booking.public_id, ?outcome, "Payment completed");
            }
            CommandKind::Fail => {
                let booking = self.booking(required(record.target.as_deref(), "target")?)?;
                let (_, payment) = self.open_payment(booking).await?;
                let payload = json!({
                    "type": "payment_intent.payment_failed",
                    "data": {"object": {"id": payment.payment_intent}},
                });
                self.engine.handle_webhook(payload).await?;
            }
            CommandKind::Cancel => {
                let booking = self.booking(required(record.target.as_deref(), "target")?)?;
                self.engine
                    .cancel_booking(booking, actor(&record), false)
                    .await?;
            }
            CommandKind::CancelEvent => {
                let event = self.event(required(record.target.as_deref(), "target")?)?;
                self.engine.cancel_event(event, actor(&record), false).await?;
            }
            CommandKind::Reschedule => {
                let event = self.event(required(record.target.as_deref(), "target")?)?;
                let start = required(record.start, "start")?;
                self.engine
                    .reschedule_event(event, start, actor(&record))
                    .await?;
            }
            CommandKind::Sweep => {
                self.engine.run_sweep().await?;
            }
        }
        Ok(())
    }

    /// The latest checkout attempt of a booking that is still awaiting payment.
    async fn open_payment(&self, id: BookingId) -> Result<(Booking, Payment)> {
        let booking = self.engine.booking(id).await?;
        let payment = self
            .engine
            .payments_for_booking(id)
            .await?
            .into_iter()
            .rev()
            .find(|p| p.status == PaymentStatus::Pending && p.session_id.is_some())
            .ok_or_else(|| {
                BookingError::ValidationError(format!(
                    "booking {} has no open checkout session",
                    booking.public_id
                ))
            })?;
        Ok((booking, payment))
    }

    /// Final state of every labelled entity, in the order they were created.
    pub async fn summary(&self) -> Result<Vec<Value>> {
        let mut rows = Vec::with_capacity(self.labels.len());
        for (label, entity) in &self.labels {
            let row = match *entity {
                Labelled::Venue(id) => describe(label, "venue", self.engine.venue(id).await?)?,
                Labelled::Event(id) => describe(label, "event", self.engine.event(id).await?)?,
                Labelled::Booking(id) => {
                    let mut row = describe(label, "booking", self.engine.booking(id).await?)?;
                    let payments = self.engine.payments_for_booking(id).await?;
                    if let Value::Object(map) = &mut row {
                        map.insert("payments".to_string(), serde_json::to_value(payments)?);
                    }
                    row
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    fn label(&mut self, label: &str, entity: Labelled) -> Result<()> {
        if self.labels.iter().any(|(existing, _)| existing == label) {
            return Err(BookingError::ValidationError(format!(
                "label {label} is already in use"
            )));
        }
        self.labels.push((label.to_string(), entity));
        Ok(())
    }

    fn resolve(&self, label: &str) -> Result<Labelled> {
        self.labels
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, entity)| *entity)
            .ok_or_else(|| BookingError::not_found(format!("label {label}")))
    }

    fn venue(&self, label: &str) -> Result<VenueId> {
        match self.resolve(label)? {
            Labelled::Venue(id) => Ok(id),
            _ => Err(wrong_kind(label, "venue")),
        }
    }

    fn event(&self, label: &str) -> Result<EventId> {
        match self.resolve(label)? {
            Labelled::Event(id) => Ok(id),
            _ => Err(wrong_kind(label, "event")),
        }
    }

    fn booking(&self, label: &str) -> Result<BookingId> {
        match self.resolve(label)? {
            Labelled::Booking(id) => Ok(id),
            _ => Err(wrong_kind(label, "booking")),
        }
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| BookingError::ValidationError(format!("missing {column} column")))
}

fn user(record: &CommandRecord) -> Result<UserId> {
    required(record.user, "user").map(UserId)
}

/// Commands without a user run as the operator.
fn actor(record: &CommandRecord) -> Actor {
    match record.user {
        Some(id) => Actor::User(UserId(id)),
        None => Actor::System,
    }
}

fn wrong_kind(label: &str, expected: &str) -> BookingError {
    BookingError::ValidationError(format!("label {label} does not name a {expected}"))
}

fn describe(label: &str, kind: &str, entity: impl Serialize) -> Result<Value> {
    let mut value = serde_json::to_value(entity)?;
    if let Value::Object(map) = &mut value {
        map.insert("ref".to_string(), Value::from(label));
        map.insert("kind".to_string(), Value::from(kind));
    }
    Ok(value)
}
