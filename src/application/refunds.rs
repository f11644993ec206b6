use super::bookings::ensure_before_deadline;
use super::context::Context;
use super::unit_of_work::UnitOfWork;
use crate::domain::audit::{Actor, AuditEvent};
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::event::Event;
use crate::domain::ids::{BookingId, PaymentId};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::error::{BookingError, Result, StateConflict};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of a refund attempt. Business-level refusals ("already refunded",
/// "nothing to refund") are outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundOutcome {
    pub refunded: bool,
    pub message: String,
    /// The refund row, when one was written.
    pub payment: Option<Payment>,
}

impl RefundOutcome {
    fn done(message: impl Into<String>, payment: Payment) -> Self {
        Self {
            refunded: true,
            message: message.into(),
            payment: Some(payment),
        }
    }

    fn declined(message: impl Into<String>) -> Self {
        Self {
            refunded: false,
            message: message.into(),
            payment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundPolicy {
    /// The event must not have started and the refund deadline must not have passed.
    Standard,
    /// System-override cancellations skip the time checks.
    DeadlineWaived,
}

pub struct RefundService {
    ctx: Arc<Context>,
}

impl RefundService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    pub async fn process_refund(&self, id: BookingId, actor: Actor) -> Result<RefundOutcome> {
        let event_id = self.ctx.load_booking(id).await?.event;
        let _guard = self.ctx.locks.acquire_pair(event_id, id).await;
        let booking = self.ctx.load_booking(id).await?;
        if !actor.may_act_for(booking.user) {
            return Err(BookingError::Forbidden(format!(
                "booking {} belongs to another user",
                booking.public_id
            )));
        }
        let event = self.ctx.load_event(booking.event).await?;

        let mut uow = self.ctx.unit_of_work(actor);
        let outcome = self
            .stage_refund(&mut uow, &booking, &event, RefundPolicy::Standard)
            .await?;
        self.ctx.commit(uow).await?;
        Ok(outcome)
    }

    /// Stages the refund of a confirmed booking's charge. Gateway errors
    /// propagate so that the caller's unit of work is discarded.
    pub(crate) async fn stage_refund(
        &self,
        uow: &mut UnitOfWork,
        booking: &Booking,
        event: &Event,
        policy: RefundPolicy,
    ) -> Result<RefundOutcome> {
        if booking.status != BookingStatus::Confirmed {
            return Err(StateConflict::NotRefundable(booking.public_id, booking.status).into());
        }

        let now = self.ctx.now();
        if policy == RefundPolicy::Standard {
            if now >= event.start {
                return Err(BookingError::ValidationError(format!(
                    "event {} has already started",
                    event.id
                )));
            }
            ensure_before_deadline(
                event.start,
                now,
                self.ctx.config.refund_deadline(),
                "refund",
            )?;
        }

        let payments = self.ctx.store.payments_for_booking(booking.id).await?;
        if payments.iter().any(Payment::is_refund) {
            return Ok(RefundOutcome::declined("booking already refunded"));
        }
        let Some(charge) = payments
            .iter()
            .rev()
            .find(|p| p.status == PaymentStatus::Succeeded)
        else {
            return Ok(RefundOutcome::declined("no successful payment to refund"));
        };

        let refund = if charge.amount == 0 {
            self.refund_row(booking, Some(charge.id), 0, None, charge.payment_intent.clone())
                .await?
        } else {
            let Some(intent) = charge.payment_intent.clone() else {
                return Err(BookingError::IntegrityError(format!(
                    "payment {} succeeded without a payment intent",
                    charge.id
                )));
            };
            let receipt = self
                .ctx
                .call_gateway(
                    self.ctx
                        .gateway
                        .create_refund(&intent, charge.amount, &charge.currency),
                )
                .await?;
            self.refund_row(
                booking,
                Some(charge.id),
                -charge.amount,
                Some(receipt.refund_id),
                Some(intent),
            )
            .await?
        };

        uow.put_payment(refund.clone());
        uow.record(AuditEvent::PaymentRefunded {
            payment: refund.id,
            booking: booking.public_id,
            amount: refund.amount,
            emergency: false,
        });
        info!(booking = %booking.public_id, amount = refund.amount, "Refund issued");
        Ok(RefundOutcome::done("refund issued", refund))
    }

    /// Refunds money taken for a booking that could not be honoured.
    /// Never fails: every problem is reported in the outcome.
    pub async fn process_emergency_refund(
        &self,
        id: BookingId,
        payment_intent: &str,
        reason: &str,
    ) -> RefundOutcome {
        let booking = match self.ctx.load_booking(id).await {
            Ok(booking) => booking,
            Err(e) => return RefundOutcome::declined(format!("emergency refund failed: {e}")),
        };
        let _guard = self.ctx.locks.acquire_pair(booking.event, id).await;

        let attempt = async {
            let booking = self.ctx.load_booking(id).await?;
            let mut uow = self.ctx.unit_of_work(Actor::System);
            let outcome = self
                .stage_emergency_refund(&mut uow, &booking, payment_intent, reason)
                .await?;
            self.ctx.commit(uow).await?;
            Ok::<_, BookingError>(outcome)
        };
        attempt
            .await
            .unwrap_or_else(|e| RefundOutcome::declined(format!("emergency refund failed: {e}")))
    }

    /// Stages a refund of the charge made through `payment_intent`, with no
    /// eligibility checks. The caller holds the booking's locks.
    pub(crate) async fn stage_emergency_refund(
        &self,
        uow: &mut UnitOfWork,
        booking: &Booking,
        payment_intent: &str,
        reason: &str,
    ) -> Result<RefundOutcome> {
        let payments = self.ctx.store.payments_for_booking(booking.id).await?;
        let charge = payments
            .iter()
            .rev()
            .find(|p| !p.is_refund() && p.payment_intent.as_deref() == Some(payment_intent));
        if payments.iter().any(|p| {
            p.is_refund()
                && (p.payment_intent.as_deref() == Some(payment_intent)
                    || (charge.is_some() && p.refund_of == charge.map(|c| c.id)))
        }) {
            return Ok(RefundOutcome::declined("booking already refunded"));
        }

        let (amount, currency, refund_of) = match charge {
            Some(c) => (c.amount, c.currency.clone(), Some(c.id)),
            None if booking.amount > 0 => (booking.amount, booking.currency.clone(), None),
            None => return Ok(RefundOutcome::declined("nothing to refund")),
        };

        let refund_id = if amount == 0 {
            None
        } else {
            match self
                .ctx
                .call_gateway(
                    self.ctx
                        .gateway
                        .create_refund(payment_intent, amount, &currency),
                )
                .await
            {
                Ok(receipt) => Some(receipt.refund_id),
                Err(e) => {
                    error!(booking = %booking.public_id, payment_intent, reason, error = %e, "Emergency refund failed; manual follow-up required");
                    return Ok(RefundOutcome::declined(format!(
                        "emergency refund failed: {e}"
                    )));
                }
            }
        };

        let refund = self
            .refund_row(
                booking,
                refund_of,
                -amount,
                refund_id,
                Some(payment_intent.to_string()),
            )
            .await?;
        uow.put_payment(refund.clone());
        uow.record(AuditEvent::PaymentRefunded {
            payment: refund.id,
            booking: booking.public_id,
            amount: refund.amount,
            emergency: true,
        });
        warn!(booking = %booking.public_id, payment_intent, reason, amount, "Emergency refund issued");
        Ok(RefundOutcome::done(
            format!("emergency refund issued: {reason}"),
            refund,
        ))
    }

    async fn refund_row(
        &self,
        booking: &Booking,
        refund_of: Option<PaymentId>,
        amount: i64,
        refund_id: Option<String>,
        payment_intent: Option<String>,
    ) -> Result<Payment> {
        Ok(Payment {
            id: PaymentId(self.ctx.store.next_id().await?),
            user: booking.user,
            booking: booking.id,
            amount,
            currency: booking.currency.clone(),
            status: PaymentStatus::Succeeded,
            session_id: None,
            payment_intent,
            refund_id,
            refund_of,
            raw_event: None,
            created_at: self.ctx.now(),
        })
    }
}
