//! Storage abstraction for the checkout core.
//!
//! Services talk to these traits, never to the pool directly. The Postgres
//! implementations put the row-lock-then-recheck pattern behind single
//! methods (`confirm_and_redeem`, `increment_usage`) so the transaction
//! boundary is not smeared across callers; the in-memory implementations
//! serialize the same critical sections behind one mutex and back the
//! service-level test suites.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Coupon, CouponReservation, DiscountKind, Event, Registration};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("an active reservation already exists for this registration")]
    ActiveReservationExists,

    #[error("coupon usage limit reached")]
    UsageLimitReached,

    #[error("reservation is {0} and cannot be confirmed")]
    ReservationNotConfirmable(&'static str),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row"),
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Payload for creating a coupon (manually or via bulk generation).
#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub event_id: Option<Uuid>,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub max_uses: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub expiry_year: Option<i32>,
}

/// Payload for creating a draft registration.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub event_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub coupon_code: Option<String>,
    pub ticket_price: Decimal,
    pub discount_amount: Decimal,
    pub expected_amount: Decimal,
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> StoreResult<Event>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Case-insensitive lookup among live (non-deleted) rows.
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Coupon>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Coupon>;

    async fn create(&self, input: NewCoupon) -> StoreResult<Coupon>;

    /// Bulk generation; all-or-nothing.
    async fn create_batch(&self, inputs: Vec<NewCoupon>) -> StoreResult<Vec<Coupon>>;

    /// Atomically bump `used_count` under a row lock, re-checking the limit
    /// first. Fails with [`StoreError::UsageLimitReached`] if the lock
    /// reveals the counter is already at `max_uses`.
    async fn increment_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon>;

    /// Atomically decrement `used_count` under a row lock, flooring at zero.
    async fn decrement_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon>;

    /// Unexpired holds currently counting against this coupon's capacity.
    async fn active_reservation_count(
        &self,
        coupon_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64>;

    /// Year-rollover job: deactivate live coupons whose `expiry_year` is in
    /// the past. Returns how many rows changed.
    async fn deactivate_expired_years(&self, current_year: i32, now: DateTime<Utc>)
        -> StoreResult<u64>;

    /// Soft delete; usage history survives.
    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Re-reads the coupon's durable counter fresh and fails with
    /// [`StoreError::UsageLimitReached`] when it is exhausted, so a caller
    /// holding a stale coupon snapshot cannot place a hold on spent
    /// capacity. Fails with [`StoreError::ActiveReservationExists`] if the
    /// registration already holds an active reservation.
    async fn create(
        &self,
        coupon_id: Uuid,
        registration_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<CouponReservation>;

    async fn find(&self, id: Uuid) -> StoreResult<CouponReservation>;

    async fn find_active_for_registration(
        &self,
        registration_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CouponReservation>>;

    /// Most recent reservation for a registration regardless of status.
    /// Payment webhooks use this so a hold that lapsed mid-checkout can
    /// still be found and redeemed.
    async fn find_latest_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<CouponReservation>>;

    /// The confirmation critical section, as one transaction: lock the
    /// coupon row, re-check `max_uses`, increment `used_count`, and mark
    /// the reservation confirmed. Loses a limit race cleanly with
    /// [`StoreError::UsageLimitReached`]. Re-confirming an already
    /// confirmed reservation is a no-op (no second increment).
    async fn confirm_and_redeem(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<CouponReservation>;

    /// Idempotent: released and confirmed reservations are left untouched.
    async fn release(&self, reservation_id: Uuid, now: DateTime<Utc>)
        -> StoreResult<CouponReservation>;

    /// Reaper step 1: flip `reserved` holds past their TTL to `expired`.
    async fn expire_due(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Reaper step 3: release `reserved` holds whose owning registration is
    /// abandoned or payment-failed.
    async fn release_for_dead_registrations(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn create(&self, input: NewRegistration, now: DateTime<Utc>) -> StoreResult<Registration>;

    async fn find(&self, id: Uuid) -> StoreResult<Registration>;

    /// Most recent live registration for this event + email
    /// (case-insensitive).
    async fn find_for_event_email(
        &self,
        event_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Registration>>;

    /// Persist the mutable checkout fields of an existing row.
    async fn update(&self, registration: &Registration, now: DateTime<Utc>) -> StoreResult<()>;

    async fn confirmed_count(&self, event_id: Uuid) -> StoreResult<i64>;

    /// Reaper step 2: mark live draft/pending_payment rows untouched since
    /// `cutoff` as abandoned. Staleness keys off `updated_at` so an old row
    /// freshly re-initiated in place is not reaped mid-checkout. Returns how
    /// many rows changed.
    async fn abandon_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Explicit cancellation path; the only way a registration is deleted.
    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;
}
