//! Shared application state handed to the axum handlers.

use std::sync::Arc;

use crate::gateway::WebhookVerifier;
use crate::repository::postgres::{
    PgCouponRepository, PgEventRepository, PgRegistrationRepository, PgReservationRepository,
};
use crate::services::{CheckoutService, Clock};

/// The concrete checkout service the HTTP layer runs against.
pub type Checkout = CheckoutService<
    PgEventRepository,
    PgCouponRepository,
    PgReservationRepository,
    PgRegistrationRepository,
>;

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<Checkout>,
    pub webhook_verifier: WebhookVerifier,
    pub clock: Arc<dyn Clock>,
}
