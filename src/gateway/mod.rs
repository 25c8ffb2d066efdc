//! Payment gateway adapter.
//!
//! The checkout state machine only ever sees the [`PaymentGateway`] trait
//! and the parsed [`GatewayEvent`]s; the Stripe-shaped HTTP client and the
//! webhook wire format live in [`stripe`], and tests run against
//! [`mock::MockGateway`].

pub mod mock;
pub mod stripe;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub use stripe::{StripeGateway, WebhookVerifier};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("gateway returned an unusable response: {0}")]
    BadResponse(String),
}

/// Input for creating a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub registration_id: Uuid,
    pub event_slug: String,
    pub customer_email: String,
    /// Major units, two decimals.
    pub amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A created hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;
}

/// A payment-outcome event delivered by the gateway, reduced to what the
/// state machine needs. Correlation is by the `registration_id` metadata
/// key set when the session was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    CheckoutCompleted {
        registration_id: Uuid,
        session_id: Option<String>,
        payment_intent_id: Option<String>,
    },
    CheckoutExpired {
        registration_id: Uuid,
    },
    PaymentSucceeded {
        registration_id: Uuid,
        /// Amount actually captured, major units.
        amount: Decimal,
    },
    PaymentFailed {
        registration_id: Uuid,
    },
    PartiallyFunded {
        registration_id: Uuid,
        amount: Decimal,
    },
}

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    #[error("webhook payload is missing the registration_id metadata key")]
    MissingRegistrationId,
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Deserialize)]
struct WebhookObject {
    id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    payment_intent: Option<String>,
    /// Minor units (cents), as the wire format carries them.
    amount_received: Option<i64>,
    amount_total: Option<i64>,
}

impl WebhookObject {
    fn registration_id(&self) -> Result<Uuid, WebhookParseError> {
        let raw = self
            .metadata
            .get("registration_id")
            .ok_or(WebhookParseError::MissingRegistrationId)?;
        Uuid::parse_str(raw)
            .map_err(|e| WebhookParseError::Malformed(format!("registration_id: {e}")))
    }

    fn captured_amount(&self) -> Decimal {
        let cents = self.amount_received.or(self.amount_total).unwrap_or(0);
        Decimal::new(cents, 2)
    }
}

impl GatewayEvent {
    /// Parses a verified webhook body. Returns `Ok(None)` for event types
    /// this core does not handle (acknowledged without processing).
    pub fn parse(payload: &[u8]) -> Result<Option<GatewayEvent>, WebhookParseError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| WebhookParseError::Malformed(e.to_string()))?;
        let object = envelope.data.object;

        let event = match envelope.kind.as_str() {
            "checkout.session.completed" => GatewayEvent::CheckoutCompleted {
                registration_id: object.registration_id()?,
                session_id: object.id.clone(),
                payment_intent_id: object.payment_intent.clone(),
            },
            "checkout.session.expired" => GatewayEvent::CheckoutExpired {
                registration_id: object.registration_id()?,
            },
            "payment_intent.succeeded" => GatewayEvent::PaymentSucceeded {
                registration_id: object.registration_id()?,
                amount: object.captured_amount(),
            },
            "payment_intent.payment_failed" => GatewayEvent::PaymentFailed {
                registration_id: object.registration_id()?,
            },
            "payment_intent.partially_funded" => GatewayEvent::PartiallyFunded {
                registration_id: object.registration_id()?,
                amount: object.captured_amount(),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn registration_id(&self) -> Uuid {
        match self {
            GatewayEvent::CheckoutCompleted {
                registration_id, ..
            }
            | GatewayEvent::CheckoutExpired { registration_id }
            | GatewayEvent::PaymentSucceeded {
                registration_id, ..
            }
            | GatewayEvent::PaymentFailed { registration_id }
            | GatewayEvent::PartiallyFunded {
                registration_id, ..
            } => *registration_id,
        }
    }
}
