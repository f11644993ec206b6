//! Mock payment gateway for development and testing.
//!
//! Behaves like a hosted-checkout card processor: sessions get a redirect URL
//! and an attached payment intent, refunds get an id. Failures and latency can
//! be switched on to exercise the error paths.

use crate::domain::gateway::{CheckoutRequest, CheckoutSession, GatewayRefund};
use crate::domain::ports::PaymentGateway;
use crate::error::GatewayError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRefund {
    pub refund_id: String,
    pub payment_intent: String,
    pub amount: i64,
}

#[derive(Debug, Default)]
struct MockState {
    sessions: Vec<(CheckoutRequest, CheckoutSession)>,
    refunds: Vec<RecordedRefund>,
    canceled_intents: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockPaymentGateway {
    counter: Arc<AtomicU64>,
    fail_checkouts: Arc<AtomicBool>,
    fail_refunds: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
    state: Arc<Mutex<MockState>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_checkouts(&self, fail: bool) {
        self.fail_checkouts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Delays every call, e.g. to trip the caller's timeout.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn sessions(&self) -> Vec<(CheckoutRequest, CheckoutSession)> {
        self.lock_state().sessions.clone()
    }

    pub fn refunds(&self) -> Vec<RecordedRefund> {
        self.lock_state().refunds.clone()
    }

    pub fn canceled_intents(&self) -> Vec<String> {
        self.lock_state().canceled_intents.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        self.simulate_latency().await;
        if self.fail_checkouts.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("checkout disabled".to_string()));
        }

        let n = self.next();
        let session = CheckoutSession {
            session_id: format!("cs_mock_{n}"),
            url: format!("https://checkout.mock/pay/cs_mock_{n}"),
            payment_intent: Some(format!("pi_mock_{n}")),
        };
        tracing::debug!(
            session_id = %session.session_id,
            amount = request.amount,
            "Mock checkout session created"
        );
        self.lock_state().sessions.push((request, session.clone()));
        Ok(session)
    }

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount: i64,
        _currency: &str,
    ) -> Result<GatewayRefund, GatewayError> {
        self.simulate_latency().await;
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected(format!(
                "refund for {payment_intent} declined"
            )));
        }

        let refund_id = format!("re_mock_{}", self.next());
        tracing::debug!(%payment_intent, %refund_id, amount, "Mock refund processed");
        self.lock_state().refunds.push(RecordedRefund {
            refund_id: refund_id.clone(),
            payment_intent: payment_intent.to_string(),
            amount,
        });
        Ok(GatewayRefund { refund_id, amount })
    }

    async fn cancel_payment_intent(&self, payment_intent: &str) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        self.lock_state()
            .canceled_intents
            .push(payment_intent.to_string());
        Ok(())
    }
}
