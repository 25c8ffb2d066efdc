use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::create_cors_layer;
use crate::handlers::checkout::{complete_checkout, initiate_checkout, validate_coupon};
use crate::handlers::health_check;
use crate::handlers::webhooks::payment_webhook;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events/:slug/checkout/validate", post(validate_coupon))
        .route("/events/:slug/checkout/initiate", post(initiate_checkout))
        .route("/events/:slug/checkout/complete", post(complete_checkout))
        .route("/webhooks/payment/:slug", post(payment_webhook))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer())
        .with_state(state)
}
