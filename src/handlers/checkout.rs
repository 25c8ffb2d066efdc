//! Checkout endpoints: coupon validation, initiation, completion.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::{CompleteOutcome, InitiateCheckout, PricingPreview};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Deserialize)]
pub struct ValidateCouponBody {
    pub coupon_code: String,
}

/// `POST /events/{slug}/checkout/validate` — pricing preview, no mutation.
pub async fn validate_coupon(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<ValidateCouponBody>,
) -> Result<Response, AppError> {
    let code = body.coupon_code.trim();
    if code.is_empty() {
        return Err(AppError::Validation("coupon_code must not be empty".into()));
    }
    let preview = state.checkout.validate_coupon(&slug, code).await?;
    Ok(success(preview, "Coupon is valid"))
}

#[derive(Deserialize)]
pub struct InitiateBody {
    pub email: String,
    pub full_name: String,
    pub coupon_code: Option<String>,
}

#[derive(Serialize)]
struct InitiatePayload {
    registration_id: Uuid,
    status: crate::models::RegistrationStatus,
    pricing: PricingPreview,
    /// Set when a supplied coupon was rejected and checkout proceeds at
    /// full price.
    coupon_rejection: Option<&'static str>,
}

/// `POST /events/{slug}/checkout/initiate` — draft registration plus soft
/// hold when a coupon applies.
pub async fn initiate_checkout(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<InitiateBody>,
) -> Result<Response, AppError> {
    let email = body.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".into()));
    }
    if body.full_name.trim().is_empty() {
        return Err(AppError::Validation("full_name must not be empty".into()));
    }

    let outcome = state
        .checkout
        .initiate(
            &slug,
            InitiateCheckout {
                email,
                full_name: body.full_name.trim().to_string(),
                coupon_code: body
                    .coupon_code
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            },
        )
        .await?;

    let payload = InitiatePayload {
        registration_id: outcome.registration.id,
        status: outcome.registration.status,
        pricing: outcome.pricing,
        coupon_rejection: outcome.coupon_rejection.as_ref().map(|r| r.reason()),
    };
    Ok(success(payload, "Checkout initiated"))
}

#[derive(Deserialize)]
pub struct CompleteBody {
    pub registration_id: Uuid,
}

#[derive(Serialize)]
struct CompletePayload {
    registration_id: Uuid,
    status: crate::models::RegistrationStatus,
    redirect_url: Option<String>,
}

/// `POST /events/{slug}/checkout/complete` — confirms a free registration
/// on the spot or returns the gateway redirect for a paid one. The
/// registration must belong to the event in the URL.
pub async fn complete_checkout(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<CompleteBody>,
) -> Result<Response, AppError> {
    let outcome = state.checkout.complete(&slug, body.registration_id).await?;
    let (payload, message) = match outcome {
        CompleteOutcome::Confirmed(registration) => (
            CompletePayload {
                registration_id: registration.id,
                status: registration.status,
                redirect_url: None,
            },
            "Registration confirmed",
        ),
        CompleteOutcome::RedirectToPayment { registration, url } => (
            CompletePayload {
                registration_id: registration.id,
                status: registration.status,
                redirect_url: Some(url),
            },
            "Redirect to payment",
        ),
    };
    Ok(success(payload, message))
}
