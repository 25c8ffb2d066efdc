use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::gateway::WebhookParseError;
use crate::models::CouponRejection;
use crate::repository::StoreError;
use crate::services::CheckoutError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Coupon rejected: {0}")]
    CouponRejected(CouponRejection),

    #[error("Registrations are closed")]
    RegistrationsClosed,

    #[error("Event is sold out")]
    SoldOut,

    #[error("A confirmed registration already exists for this email")]
    DuplicateEmail,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Registration cannot be completed: currently {0}")]
    NotCompletable(String),

    #[error("Webhook rejected: {0}")]
    WebhookRejected(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::WebhookRejected(_) => StatusCode::BAD_REQUEST,
            AppError::CouponRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RegistrationsClosed
            | AppError::SoldOut
            | AppError::DuplicateEmail
            | AppError::NotCompletable(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::CouponRejected(rejection) => rejection.reason(),
            AppError::RegistrationsClosed => "REGISTRATIONS_CLOSED",
            AppError::SoldOut => "EVENT_SOLD_OUT",
            AppError::DuplicateEmail => "DUPLICATE_EMAIL",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NotCompletable(_) => "NOT_COMPLETABLE",
            AppError::WebhookRejected(_) => "WEBHOOK_REJECTED",
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            // User-correctable rejections are expected traffic.
            AppError::Validation(_)
            | AppError::CouponRejected(_)
            | AppError::RegistrationsClosed
            | AppError::SoldOut
            | AppError::DuplicateEmail
            | AppError::NotFound(_)
            | AppError::NotCompletable(_) => {}
            AppError::WebhookRejected(msg) => {
                warn!(message = %msg, "webhook rejected");
            }
            AppError::Gateway(msg) => {
                error!(message = %msg, "payment gateway error");
            }
            AppError::Database(msg) | AppError::Internal(msg) => {
                error!(message = %msg, "server error");
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(entity) => AppError::NotFound(entity.to_string()),
            StoreError::UsageLimitReached => {
                AppError::CouponRejected(CouponRejection::UsageLimitReached)
            }
            StoreError::ActiveReservationExists | StoreError::ReservationNotConfirmable(_) => {
                AppError::Internal(e.to_string())
            }
            StoreError::Database(msg) => AppError::Database(msg),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::RegistrationsClosed => AppError::RegistrationsClosed,
            CheckoutError::SoldOut => AppError::SoldOut,
            CheckoutError::DuplicateEmail => AppError::DuplicateEmail,
            CheckoutError::Coupon(rejection) => AppError::CouponRejected(rejection),
            CheckoutError::Gateway(g) => AppError::Gateway(g.to_string()),
            CheckoutError::NotCompletable(status) => AppError::NotCompletable(status.to_string()),
            CheckoutError::Store(store) => store.into(),
        }
    }
}

impl From<WebhookParseError> for AppError {
    fn from(e: WebhookParseError) -> Self {
        AppError::WebhookRejected(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Internal detail stays in the logs; clients get the public text.
        let public_message = match &self {
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}
