use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where a registration sits in the checkout flow.
///
/// Stored as plain text, hence the `varchar` type name for binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RegistrationStatus {
    Draft,
    PendingPayment,
    PaymentProcessing,
    Confirmed,
    Abandoned,
    PaymentFailed,
}

impl RegistrationStatus {
    /// A registration in one of these states can be re-initiated in place.
    pub fn can_be_retried(self) -> bool {
        !matches!(self, RegistrationStatus::Confirmed)
    }
}

/// Derived strictly from `paid_amount` vs `expected_amount`, never set
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Failed,
    Refunded,
    Cancelled,
}

/// One attendee's signup for one event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub email: String,
    pub full_name: String,
    /// Snapshot of the coupon code applied at initiation time.
    pub coupon_code: Option<String>,
    pub ticket_price: Decimal,
    pub discount_amount: Decimal,
    pub expected_amount: Decimal,
    pub paid_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub status: RegistrationStatus,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Registration {
    /// The single path by which payment events write `paid_amount` and
    /// `payment_status`. Recomputing the status from the captured amount
    /// keeps a partial capture from ever being flagged as fully paid.
    ///
    /// Idempotent for repeated deliveries of the same amount.
    pub fn mark_as_paid(&mut self, amount: Decimal) {
        self.paid_amount = amount;
        self.payment_status = if amount >= self.expected_amount {
            PaymentStatus::Paid
        } else if amount > Decimal::ZERO {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        };
    }

    pub fn is_free(&self) -> bool {
        self.expected_amount <= Decimal::ZERO
    }

    pub fn can_be_retried(&self) -> bool {
        self.status.can_be_retried()
    }
}
