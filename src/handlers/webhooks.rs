//! Payment webhook ingress.
//!
//! Signature verification runs on the raw body before anything is parsed.
//! An unverifiable or malformed payload is rejected with 400 and will never
//! be retried; a processing failure returns 5xx so the gateway redelivers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::{info, warn};

use crate::gateway::GatewayEvent;
use crate::services::WebhookOutcome;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::empty_success;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// `POST /webhooks/payment/{slug}`.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(event_slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::WebhookRejected("missing signature header".into()))?;

    state
        .webhook_verifier
        .verify(&body, signature, state.clock.now())
        .map_err(|e| AppError::WebhookRejected(e.to_string()))?;

    let Some(event) = GatewayEvent::parse(&body)? else {
        // Verified but not an event type this core handles.
        return Ok(empty_success("Event ignored"));
    };

    let registration_id = event.registration_id();
    match state.checkout.apply_gateway_event(event).await {
        Ok(WebhookOutcome::Applied { registration, .. }) => {
            info!(
                %registration_id,
                event_slug = %event_slug,
                status = ?registration.status,
                "webhook applied"
            );
            Ok(empty_success("Event processed"))
        }
        Ok(WebhookOutcome::NoOp) => Ok(empty_success("Event already applied")),
        Err(e) => {
            // Non-200 makes the gateway retry delivery.
            warn!(
                %registration_id,
                event_slug = %event_slug,
                error = %e,
                "webhook processing failed"
            );
            Err(e.into())
        }
    }
}
