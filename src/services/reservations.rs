//! Reservation manager: soft holds on coupon capacity.
//!
//! A hold never touches the durable `used_count`; the counter moves only at
//! confirmation, inside the store's locked critical section. Creation checks
//! the durable counter alone (freshly, under the store's lock) — soft holds
//! are deliberately optimistic, and the lock-and-recheck at confirmation is
//! the normative guarantee that confirmed uses never exceed `max_uses`.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Coupon, CouponReservation};
use crate::repository::{ReservationRepository, StoreError, StoreResult};
use crate::services::Clock;

pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 30;

pub struct ReservationManager<R> {
    reservations: R,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<R: ReservationRepository> ReservationManager<R> {
    pub fn new(reservations: R, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            reservations,
            clock,
            ttl,
        }
    }

    /// Places a soft hold for one registration. The store re-reads the
    /// durable counter fresh, so this fails with
    /// [`StoreError::UsageLimitReached`] when the last use was spent after
    /// `coupon` was read, and with
    /// [`StoreError::ActiveReservationExists`] if the registration already
    /// holds an active one.
    pub async fn create_reservation(
        &self,
        coupon: &Coupon,
        registration_id: Uuid,
    ) -> StoreResult<CouponReservation> {
        let now = self.clock.now();
        let reservation = self
            .reservations
            .create(coupon.id, registration_id, now, now + self.ttl)
            .await?;
        debug!(
            reservation_id = %reservation.id,
            coupon_id = %coupon.id,
            registration_id = %registration_id,
            expires_at = %reservation.expires_at,
            "coupon reserved"
        );
        Ok(reservation)
    }

    /// Confirms a hold and durably increments the coupon counter, in one
    /// locked transaction. The sole trigger of `used_count` going up.
    pub async fn confirm(&self, reservation_id: Uuid) -> StoreResult<CouponReservation> {
        let result = self
            .reservations
            .confirm_and_redeem(reservation_id, self.clock.now())
            .await;
        if let Err(StoreError::UsageLimitReached) = &result {
            // Expected-but-rare: this hold lost the race for the last use.
            warn!(%reservation_id, "reservation confirmation lost usage-limit race");
        }
        result
    }

    /// Releases a hold. Idempotent; confirmed holds stay confirmed.
    pub async fn release(&self, reservation_id: Uuid) -> StoreResult<CouponReservation> {
        self.reservations
            .release(reservation_id, self.clock.now())
            .await
    }

    /// Releases whatever active hold a registration carries, if any.
    /// A missing hold is not an error.
    pub async fn release_for_registration(&self, registration_id: Uuid) -> StoreResult<()> {
        let now = self.clock.now();
        if let Some(reservation) = self
            .reservations
            .find_active_for_registration(registration_id, now)
            .await?
        {
            self.reservations.release(reservation.id, now).await?;
        }
        Ok(())
    }

    /// Latest hold for a registration, any status. Used by the payment
    /// webhook path, where the hold may have lapsed mid-checkout.
    pub async fn find_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<CouponReservation>> {
        self.reservations
            .find_latest_for_registration(registration_id)
            .await
    }
}
