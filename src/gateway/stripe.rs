//! Stripe-shaped HTTP client and webhook signature verification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::gateway::{CheckoutSession, CreateSessionRequest, GatewayError, PaymentGateway};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Hosted-checkout client. Only session creation is needed by this core;
/// everything else arrives through webhooks.
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key: secret_key.into(),
        }
    }

    /// Point the client at a different API host (test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        // The wire format wants minor units.
        let amount_cents = (request.amount * Decimal::from(100))
            .trunc()
            .to_string();

        let form: Vec<(&str, String)> = vec![
            ("mode", "payment".into()),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("customer_email", request.customer_email),
            ("line_items[0][quantity]", "1".into()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            ("line_items[0][price_data][unit_amount]", amount_cents),
            (
                "line_items[0][price_data][product_data][name]",
                format!("Registration: {}", request.event_slug),
            ),
            (
                "metadata[registration_id]",
                request.registration_id.to_string(),
            ),
            (
                "payment_intent_data[metadata][registration_id]",
                request.registration_id.to_string(),
            ),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Request(format!(
                "session creation returned {status}: {body}"
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::BadResponse("session has no redirect url".into()))?;
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("no matching signature")]
    NoMatch,
}

/// Verifies `t=<unix>,v1=<hex hmac>` webhook signature headers, Stripe
/// style: HMAC-SHA256 over `"{t}.{payload}"`, with a replay window.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: 300,
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(
                        value
                            .parse()
                            .map_err(|_| SignatureError::MalformedHeader)?,
                    );
                }
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
        if candidates.is_empty() {
            return Err(SignatureError::MalformedHeader);
        }
        if (now.timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(SignatureError::TimestampOutOfTolerance);
        }

        for candidate in candidates {
            let Ok(candidate_bytes) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
                .map_err(|_| SignatureError::MalformedHeader)?;
            mac.update(format!("{timestamp}.").as_bytes());
            mac.update(payload);
            // verify_slice is constant-time.
            if mac.verify_slice(&candidate_bytes).is_ok() {
                return Ok(());
            }
        }
        Err(SignatureError::NoMatch)
    }
}
