//! Payment orchestration: checkout sessions, gateway callbacks and webhooks.

use super::bookings::{BookingService, ConfirmationSource};
use super::context::Context;
use super::refunds::{RefundOutcome, RefundService};
use crate::domain::audit::{Actor, AuditEvent};
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::event::EventStatus;
use crate::domain::gateway::{
    BOOKING_METADATA_KEY, CheckoutRequest, GatewayNotification, USER_METADATA_KEY, WebhookEvent,
};
use crate::domain::ids::{BookingId, PaymentId};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::error::{BookingError, Result, StateConflict};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutOutcome {
    /// Where to send the customer; `None` when nothing had to be paid.
    pub redirect_url: Option<String>,
    pub session_id: Option<String>,
    pub payment: Payment,
    pub booking: Booking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Confirmed(Booking),
    AlreadyConfirmed(Booking),
    /// The money arrived but the booking could not be honoured.
    Refunded {
        booking: Booking,
        refund: RefundOutcome,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Callback(CallbackOutcome),
    /// Number of payment rows whose status changed.
    PaymentsUpdated(usize),
    Ignored(String),
}

pub struct PaymentService {
    ctx: Arc<Context>,
}

impl PaymentService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn bookings(&self) -> BookingService {
        BookingService::new(self.ctx.clone())
    }

    fn refunds(&self) -> RefundService {
        RefundService::new(self.ctx.clone())
    }

    /// Opens a checkout session for a pending booking. Free bookings are
    /// confirmed on the spot without contacting the gateway.
    pub async fn create_session(
        &self,
        id: BookingId,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutOutcome> {
        let event_id = self.ctx.load_booking(id).await?.event;
        let _guard = self.ctx.locks.acquire_pair(event_id, id).await;
        let booking = self.ctx.load_booking(id).await?;
        let now = self.ctx.now();

        if booking.status != BookingStatus::Pending {
            return Err(StateConflict::BookingNotPayable(booking.public_id, booking.status).into());
        }
        if booking.is_expired_at(now) {
            return Err(StateConflict::BookingExpired(booking.public_id).into());
        }
        let attempts = self
            .ctx
            .store
            .payments_for_booking(booking.id)
            .await?
            .iter()
            .filter(|p| !p.is_refund())
            .count();
        let limit = self.ctx.config.max_payment_attempts;
        if attempts >= limit as usize {
            return Err(StateConflict::RetryLimitExceeded(booking.public_id, limit).into());
        }

        let mut uow = self.ctx.unit_of_work(Actor::User(booking.user));
        let mut payment = Payment {
            id: PaymentId(self.ctx.store.next_id().await?),
            user: booking.user,
            booking: booking.id,
            amount: booking.amount,
            currency: booking.currency.clone(),
            status: PaymentStatus::Pending,
            session_id: None,
            payment_intent: None,
            refund_id: None,
            refund_of: None,
            raw_event: None,
            created_at: now,
        };

        if booking.amount == 0 {
            payment.status = PaymentStatus::Succeeded;
            uow.put_payment(payment.clone());
            uow.record(AuditEvent::PaymentSucceeded {
                payment: payment.id,
                booking: booking.public_id,
                amount: 0,
            });
            let confirmation = self
                .bookings()
                .stage_confirmation(&mut uow, booking, None, ConfirmationSource::Direct)
                .await?;
            self.ctx.commit(uow).await?;
            info!(booking = %confirmation.booking.public_id, "Free booking confirmed without checkout");
            return Ok(CheckoutOutcome {
                redirect_url: None,
                session_id: None,
                payment,
                booking: confirmation.booking,
            });
        }

        let mut event = self.ctx.load_event(booking.event).await?;
        if event.status == EventStatus::Draft && booking.user == event.organizer {
            event.status = EventStatus::PendingConfirmation;
            uow.put_event(event.clone());
        }

        let request = CheckoutRequest {
            amount: booking.amount,
            currency: booking.currency.clone(),
            description: format!("{} session: {}", event.language, event.theme),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
            metadata: BTreeMap::from([
                (BOOKING_METADATA_KEY.to_string(), booking.public_id.to_string()),
                (USER_METADATA_KEY.to_string(), booking.user.to_string()),
            ]),
        };
        let session = self
            .ctx
            .call_gateway(self.ctx.gateway.create_checkout_session(request))
            .await?;

        payment.session_id = Some(session.session_id.clone());
        payment.payment_intent = session.payment_intent.clone();
        uow.put_payment(payment.clone());
        uow.record(AuditEvent::PaymentCreated {
            payment: payment.id,
            booking: booking.public_id,
            amount: payment.amount,
        });
        self.ctx.commit(uow).await?;

        info!(booking = %booking.public_id, session_id = %session.session_id, attempt = attempts + 1, "Checkout session opened");
        Ok(CheckoutOutcome {
            redirect_url: Some(session.url),
            session_id: Some(session.session_id),
            payment,
            booking,
        })
    }

    /// Records a successful payment reported by the gateway and confirms the
    /// booking. Safe to call any number of times for the same payment.
    pub async fn confirm_from_callback(
        &self,
        booking_public_id: Uuid,
        session_id: Option<&str>,
        payment_intent: Option<&str>,
        raw: Option<Value>,
    ) -> Result<CallbackOutcome> {
        let found = self
            .ctx
            .store
            .booking_by_public_id(booking_public_id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("booking {booking_public_id}")))?;
        let _guard = self.ctx.locks.acquire_pair(found.event, found.id).await;
        let booking = self.ctx.load_booking(found.id).await?;
        if booking.status == BookingStatus::Confirmed
            && session_id.is_none()
            && payment_intent.is_none()
        {
            return Ok(CallbackOutcome::AlreadyConfirmed(booking));
        }

        let mut payment = match self.find_charge(&booking, session_id, payment_intent).await? {
            Some(existing) => existing,
            None => Payment {
                id: PaymentId(self.ctx.store.next_id().await?),
                user: booking.user,
                booking: booking.id,
                amount: booking.amount,
                currency: booking.currency.clone(),
                status: PaymentStatus::Pending,
                session_id: session_id.map(str::to_string),
                payment_intent: None,
                refund_id: None,
                refund_of: None,
                raw_event: None,
                created_at: self.ctx.now(),
            },
        };

        let charged_before = payment.status == PaymentStatus::Succeeded;
        if !charged_before {
            payment.status = PaymentStatus::Succeeded;
            if let Some(intent) = payment_intent {
                payment.payment_intent = Some(intent.to_string());
            }
            if raw.is_some() {
                payment.raw_event = raw;
            }
            let mut uow = self.ctx.unit_of_work(Actor::System);
            uow.put_payment(payment.clone());
            uow.record(AuditEvent::PaymentSucceeded {
                payment: payment.id,
                booking: booking.public_id,
                amount: payment.amount,
            });
            self.ctx.commit(uow).await?;
            info!(booking = %booking.public_id, payment = %payment.id, "Payment succeeded");
        }

        if booking.status == BookingStatus::Confirmed {
            if charged_before || confirmed_by(&booking, &payment) {
                return Ok(CallbackOutcome::AlreadyConfirmed(booking));
            }
            let reason = "booking already confirmed by another payment".to_string();
            warn!(booking = %booking.public_id, payment = %payment.id, "Second charge for a confirmed booking; refunding");
            return self.compensate(booking, payment, reason).await;
        }

        let reference = payment
            .payment_intent
            .clone()
            .or_else(|| payment.session_id.clone());
        let mut uow = self.ctx.unit_of_work(Actor::System);
        let failure = match self
            .bookings()
            .stage_confirmation(
                &mut uow,
                booking.clone(),
                reference,
                ConfirmationSource::SucceededPayment,
            )
            .await
        {
            Ok(confirmation) => match self.ctx.commit(uow).await {
                Ok(()) => return Ok(CallbackOutcome::Confirmed(confirmation.booking)),
                Err(e) => e,
            },
            Err(e) => e,
        };

        let reason = failure.to_string();
        warn!(booking = %booking.public_id, reason = %reason, "Paid booking could not be confirmed; refunding");
        self.compensate(booking, payment, reason).await
    }

    /// Refunds a payment whose booking could not be confirmed and releases the
    /// booking if it is still pending. The caller holds the booking's locks.
    async fn compensate(
        &self,
        booking: Booking,
        payment: Payment,
        reason: String,
    ) -> Result<CallbackOutcome> {
        let Some(intent) = payment.payment_intent.clone() else {
            error!(booking = %booking.public_id, payment = %payment.id, "Cannot refund a payment without an intent; manual follow-up required");
            return Ok(CallbackOutcome::Refunded {
                booking,
                refund: RefundOutcome {
                    refunded: false,
                    message: "no payment intent to refund".to_string(),
                    payment: None,
                },
                reason,
            });
        };

        let mut uow = self.ctx.unit_of_work(Actor::System);
        let staged = async {
            let refund = self
                .refunds()
                .stage_emergency_refund(&mut uow, &booking, &intent, &reason)
                .await?;
            let booking = if booking.status == BookingStatus::Pending {
                self.bookings()
                    .stage_cancellation(&mut uow, booking.clone(), true)
                    .await?
                    .booking
            } else {
                booking.clone()
            };
            Ok::<_, BookingError>((refund, booking))
        }
        .await;

        let outcome = match staged {
            Ok((refund, updated)) => match self.ctx.commit(uow).await {
                Ok(()) => CallbackOutcome::Refunded {
                    booking: updated,
                    refund,
                    reason,
                },
                Err(e) => {
                    error!(booking = %booking.public_id, error = %e, "Failed to record emergency refund");
                    CallbackOutcome::Refunded {
                        booking,
                        refund: RefundOutcome {
                            refunded: refund.refunded,
                            message: format!("{}; recording it failed: {e}", refund.message),
                            payment: None,
                        },
                        reason,
                    }
                }
            },
            Err(e) => {
                error!(booking = %booking.public_id, error = %e, "Emergency refund failed");
                CallbackOutcome::Refunded {
                    booking,
                    refund: RefundOutcome {
                        refunded: false,
                        message: format!("emergency refund failed: {e}"),
                        payment: None,
                    },
                    reason,
                }
            }
        };
        Ok(outcome)
    }

    /// Finds the charge row a callback refers to. A row already holding the
    /// intent wins over the session's row. An intent-only callback adopts the
    /// newest PENDING row that is still waiting for its intent.
    async fn find_charge(
        &self,
        booking: &Booking,
        session_id: Option<&str>,
        payment_intent: Option<&str>,
    ) -> Result<Option<Payment>> {
        let belongs = |p: &Payment| p.booking == booking.id && !p.is_refund();
        if let Some(intent) = payment_intent
            && let Some(p) = self
                .ctx
                .store
                .payments_by_intent(intent)
                .await?
                .into_iter()
                .find(belongs)
        {
            return Ok(Some(p));
        }
        if let Some(session) = session_id {
            return Ok(self
                .ctx
                .store
                .payments_by_session(session)
                .await?
                .into_iter()
                .find(belongs));
        }
        if payment_intent.is_none() {
            return Ok(None);
        }
        Ok(self
            .ctx
            .store
            .payments_for_booking(booking.id)
            .await?
            .into_iter()
            .filter(|p| {
                belongs(p) && p.status == PaymentStatus::Pending && p.payment_intent.is_none()
            })
            .max_by_key(|p| p.id))
    }

    pub async fn mark_failed(&self, payment_intent: &str) -> Result<usize> {
        let rows = self.ctx.store.payments_by_intent(payment_intent).await?;
        self.settle_pending(rows, PaymentStatus::Failed, None).await
    }

    pub async fn mark_intent_canceled(&self, payment_intent: &str) -> Result<usize> {
        let rows = self.ctx.store.payments_by_intent(payment_intent).await?;
        self.settle_pending(rows, PaymentStatus::Canceled, None).await
    }

    pub async fn mark_session_canceled(&self, session_id: &str) -> Result<usize> {
        let rows = self.ctx.store.payments_by_session(session_id).await?;
        self.settle_pending(rows, PaymentStatus::Canceled, None).await
    }

    /// Moves PENDING rows to `status`. Rows in any other status are left
    /// alone, and bookings are never touched.
    async fn settle_pending(
        &self,
        rows: Vec<Payment>,
        status: PaymentStatus,
        raw: Option<Value>,
    ) -> Result<usize> {
        let mut changed = 0;
        for row in rows.into_iter().filter(|p| !p.is_refund()) {
            let booking = self.ctx.load_booking(row.booking).await?;
            let _guard = self.ctx.locks.acquire_pair(booking.event, booking.id).await;
            let Some(mut payment) = self.ctx.store.payment(row.id).await? else {
                continue;
            };
            if payment.status != PaymentStatus::Pending {
                debug!(payment = %payment.id, status = ?payment.status, "Payment already settled");
                continue;
            }

            payment.status = status;
            if raw.is_some() {
                payment.raw_event = raw.clone();
            }
            let mut uow = self.ctx.unit_of_work(Actor::System);
            uow.put_payment(payment.clone());
            uow.record(match status {
                PaymentStatus::Failed => AuditEvent::PaymentFailed {
                    payment: payment.id,
                    booking: booking.public_id,
                },
                _ => AuditEvent::PaymentCanceled {
                    payment: payment.id,
                    booking: booking.public_id,
                },
            });
            self.ctx.commit(uow).await?;
            info!(payment = %payment.id, booking = %booking.public_id, ?status, "Payment settled");
            changed += 1;
        }
        Ok(changed)
    }

    /// Dispatches a verified gateway webhook payload.
    pub async fn handle_webhook(&self, raw: Value) -> Result<WebhookOutcome> {
        let GatewayNotification { event, raw } = GatewayNotification::parse(raw)?;
        match event {
            WebhookEvent::CheckoutSessionCompleted {
                session_id,
                payment_intent,
                booking,
            } => {
                let booking = match booking {
                    Some(id) => Some(id),
                    None => self.booking_of_session(&session_id).await?,
                };
                let Some(booking) = booking else {
                    return Ok(WebhookOutcome::Ignored(format!(
                        "no booking for session {session_id}"
                    )));
                };
                let outcome = self
                    .confirm_from_callback(
                        booking,
                        Some(&session_id),
                        payment_intent.as_deref(),
                        Some(raw),
                    )
                    .await?;
                Ok(WebhookOutcome::Callback(outcome))
            }
            WebhookEvent::PaymentIntentSucceeded {
                payment_intent,
                booking,
            } => {
                let booking = match booking {
                    Some(id) => Some(id),
                    None => self.booking_of_intent(&payment_intent).await?,
                };
                let Some(booking) = booking else {
                    return Ok(WebhookOutcome::Ignored(format!(
                        "no booking for payment intent {payment_intent}"
                    )));
                };
                let outcome = self
                    .confirm_from_callback(booking, None, Some(&payment_intent), Some(raw))
                    .await?;
                Ok(WebhookOutcome::Callback(outcome))
            }
            WebhookEvent::PaymentIntentFailed { payment_intent } => {
                let rows = self.ctx.store.payments_by_intent(&payment_intent).await?;
                let changed = self
                    .settle_pending(rows, PaymentStatus::Failed, Some(raw))
                    .await?;
                Ok(WebhookOutcome::PaymentsUpdated(changed))
            }
            WebhookEvent::PaymentIntentCanceled { payment_intent } => {
                let rows = self.ctx.store.payments_by_intent(&payment_intent).await?;
                let changed = self
                    .settle_pending(rows, PaymentStatus::Canceled, Some(raw))
                    .await?;
                Ok(WebhookOutcome::PaymentsUpdated(changed))
            }
            WebhookEvent::CheckoutSessionExpired { session_id } => {
                let rows = self.ctx.store.payments_by_session(&session_id).await?;
                let changed = self
                    .settle_pending(rows, PaymentStatus::Canceled, Some(raw))
                    .await?;
                Ok(WebhookOutcome::PaymentsUpdated(changed))
            }
            WebhookEvent::Unhandled { kind } => {
                debug!(kind = %kind, "Ignoring webhook");
                Ok(WebhookOutcome::Ignored(kind))
            }
        }
    }

    async fn booking_of_session(&self, session_id: &str) -> Result<Option<Uuid>> {
        let rows = self.ctx.store.payments_by_session(session_id).await?;
        self.public_id_of(rows.first()).await
    }

    async fn booking_of_intent(&self, payment_intent: &str) -> Result<Option<Uuid>> {
        let rows = self.ctx.store.payments_by_intent(payment_intent).await?;
        self.public_id_of(rows.iter().find(|p| !p.is_refund())).await
    }

    async fn public_id_of(&self, payment: Option<&Payment>) -> Result<Option<Uuid>> {
        match payment {
            Some(p) => Ok(self.ctx.store.booking(p.booking).await?.map(|b| b.public_id)),
            None => Ok(None),
        }
    }
}

/// Whether `payment` is the charge that confirmed `booking`. Bookings
/// confirmed without a reference accept any charge.
fn confirmed_by(booking: &Booking, payment: &Payment) -> bool {
    match booking.payment_reference.as_deref() {
        None => true,
        Some(reference) => {
            payment.payment_intent.as_deref() == Some(reference)
                || payment.session_id.as_deref() == Some(reference)
        }
    }
}
