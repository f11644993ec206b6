//! Types exchanged with the external card-processing gateway.
//!
//! Webhook payloads follow the usual `{"type": ..., "data": {"object": ...}}`
//! envelope. Signature verification happens at the boundary before a payload
//! reaches [`GatewayNotification::parse`].

use crate::error::{BookingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata key carrying `Booking::public_id` through the gateway.
pub const BOOKING_METADATA_KEY: &str = "booking_public_id";
/// Metadata key carrying the paying user's id.
pub const USER_METADATA_KEY: &str = "user_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
    /// Some gateways only attach the intent once the customer pays.
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    CheckoutSessionCompleted {
        session_id: String,
        payment_intent: Option<String>,
        booking: Option<Uuid>,
    },
    PaymentIntentSucceeded {
        payment_intent: String,
        booking: Option<Uuid>,
    },
    PaymentIntentFailed {
        payment_intent: String,
    },
    PaymentIntentCanceled {
        payment_intent: String,
    },
    CheckoutSessionExpired {
        session_id: String,
    },
    /// Event types the core does not act on.
    Unhandled {
        kind: String,
    },
}

/// A parsed webhook together with the payload it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayNotification {
    pub event: WebhookEvent,
    pub raw: serde_json::Value,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: GatewayObject,
}

#[derive(Deserialize)]
struct GatewayObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl GatewayObject {
    fn booking(&self) -> Result<Option<Uuid>> {
        self.metadata
            .get(BOOKING_METADATA_KEY)
            .map(|raw| {
                Uuid::parse_str(raw).map_err(|_| {
                    BookingError::ValidationError(format!("malformed booking id in metadata: {raw}"))
                })
            })
            .transpose()
    }
}

impl GatewayNotification {
    pub fn parse(raw: serde_json::Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(raw.clone())?;
        let object = envelope.data.object;
        let event = match envelope.kind.as_str() {
            "checkout.session.completed" => WebhookEvent::CheckoutSessionCompleted {
                booking: object.booking()?,
                session_id: object.id,
                payment_intent: object.payment_intent,
            },
            "payment_intent.succeeded" => WebhookEvent::PaymentIntentSucceeded {
                booking: object.booking()?,
                payment_intent: object.id,
            },
            "payment_intent.payment_failed" => WebhookEvent::PaymentIntentFailed {
                payment_intent: object.id,
            },
            "payment_intent.canceled" => WebhookEvent::PaymentIntentCanceled {
                payment_intent: object.id,
            },
            "checkout.session.expired" => WebhookEvent::CheckoutSessionExpired {
                session_id: object.id,
            },
            _ => WebhookEvent::Unhandled {
                kind: envelope.kind,
            },
        };
        Ok(Self { event, raw })
    }
}
