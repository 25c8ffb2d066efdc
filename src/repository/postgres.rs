//! Postgres implementations backed by `sqlx`.
//!
//! The two coupon-counter critical sections (`increment_usage` /
//! `decrement_usage` and `confirm_and_redeem`) take a `SELECT ... FOR
//! UPDATE` row lock on the coupon before re-checking the remaining-uses
//! invariant, so concurrent confirmations of a nearly-exhausted coupon
//! serialize and the loser fails cleanly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Coupon, CouponReservation, Event, Registration, ReservationStatus};
use crate::repository::{
    CouponRepository, EventRepository, NewCoupon, NewRegistration, RegistrationRepository,
    ReservationRepository, StoreError, StoreResult,
};

#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn find_by_slug(&self, slug: &str) -> StoreResult<Event> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("event"))
    }
}

#[derive(Clone)]
pub struct PgCouponRepository {
    pool: PgPool,
}

impl PgCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponRepository for PgCouponRepository {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE lower(code) = lower($1) AND deleted_at IS NULL",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(coupon)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Coupon> {
        sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("coupon"))
    }

    async fn create(&self, input: NewCoupon) -> StoreResult<Coupon> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            INSERT INTO coupons
                (event_id, code, kind, value, max_uses, valid_from, valid_until, expiry_year)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(input.event_id)
        .bind(&input.code)
        .bind(input.kind)
        .bind(input.value)
        .bind(input.max_uses)
        .bind(input.valid_from)
        .bind(input.valid_until)
        .bind(input.expiry_year)
        .fetch_one(&self.pool)
        .await?;
        Ok(coupon)
    }

    async fn create_batch(&self, inputs: Vec<NewCoupon>) -> StoreResult<Vec<Coupon>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let coupon = sqlx::query_as::<_, Coupon>(
                r#"
                INSERT INTO coupons
                    (event_id, code, kind, value, max_uses, valid_from, valid_until, expiry_year)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
                "#,
            )
            .bind(input.event_id)
            .bind(&input.code)
            .bind(input.kind)
            .bind(input.value)
            .bind(input.max_uses)
            .bind(input.valid_from)
            .bind(input.valid_until)
            .bind(input.expiry_year)
            .fetch_one(&mut *tx)
            .await?;
            created.push(coupon);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn increment_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon> {
        let mut tx = self.pool.begin().await?;
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("coupon"))?;
        if !coupon.has_uses_remaining() {
            return Err(StoreError::UsageLimitReached);
        }
        let coupon = sqlx::query_as::<_, Coupon>(
            "UPDATE coupons SET used_count = used_count + 1, updated_at = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(coupon)
    }

    async fn decrement_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon> {
        let mut tx = self.pool.begin().await?;
        // Lock first so the floor check and the write are one unit.
        sqlx::query("SELECT id FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("coupon"))?;
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            UPDATE coupons
            SET used_count = GREATEST(used_count - 1, 0), updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(coupon)
    }

    async fn active_reservation_count(
        &self,
        coupon_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM coupon_reservations
            WHERE coupon_id = $1 AND status = 'reserved' AND expires_at > $2
            "#,
        )
        .bind(coupon_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn deactivate_expired_years(
        &self,
        current_year: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET active = FALSE, updated_at = $2
            WHERE active = TRUE AND deleted_at IS NULL
              AND expiry_year IS NOT NULL AND expiry_year < $1
            "#,
        )
        .bind(current_year)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE coupons SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("coupon"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn create(
        &self,
        coupon_id: Uuid,
        registration_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<CouponReservation> {
        let mut tx = self.pool.begin().await?;
        // Fresh read of the durable counter under the row lock; a stale
        // snapshot that raced another confirmation fails here instead of
        // holding phantom capacity.
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(coupon_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("coupon"))?;
        if !coupon.has_uses_remaining() {
            return Err(StoreError::UsageLimitReached);
        }
        let existing = sqlx::query_as::<_, CouponReservation>(
            r#"
            SELECT * FROM coupon_reservations
            WHERE registration_id = $1 AND status = 'reserved' AND expires_at > $2
            LIMIT 1
            "#,
        )
        .bind(registration_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(StoreError::ActiveReservationExists);
        }
        let reservation = sqlx::query_as::<_, CouponReservation>(
            r#"
            INSERT INTO coupon_reservations (coupon_id, registration_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(coupon_id)
        .bind(registration_id)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            // The partial unique index on (registration_id) WHERE reserved
            // catches the race two concurrent initiations would open.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::ActiveReservationExists
            }
            _ => StoreError::from(e),
        })?;
        tx.commit().await?;
        Ok(reservation)
    }

    async fn find(&self, id: Uuid) -> StoreResult<CouponReservation> {
        sqlx::query_as::<_, CouponReservation>("SELECT * FROM coupon_reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("reservation"))
    }

    async fn find_active_for_registration(
        &self,
        registration_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CouponReservation>> {
        let reservation = sqlx::query_as::<_, CouponReservation>(
            r#"
            SELECT * FROM coupon_reservations
            WHERE registration_id = $1 AND status = 'reserved' AND expires_at > $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(registration_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reservation)
    }

    async fn find_latest_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<CouponReservation>> {
        let reservation = sqlx::query_as::<_, CouponReservation>(
            r#"
            SELECT * FROM coupon_reservations
            WHERE registration_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(registration_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reservation)
    }

    async fn confirm_and_redeem(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<CouponReservation> {
        let mut tx = self.pool.begin().await?;

        let reservation = sqlx::query_as::<_, CouponReservation>(
            "SELECT * FROM coupon_reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("reservation"))?;

        match reservation.status {
            // Re-delivered webhook: already redeemed, nothing to do.
            ReservationStatus::Confirmed => {
                tx.commit().await?;
                return Ok(reservation);
            }
            ReservationStatus::Released => {
                return Err(StoreError::ReservationNotConfirmable("released"));
            }
            // A hold the reaper expired can still be redeemed if payment
            // ultimately landed; the limit re-check below still applies.
            ReservationStatus::Reserved | ReservationStatus::Expired => {}
        }

        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(reservation.coupon_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("coupon"))?;
        if !coupon.has_uses_remaining() {
            return Err(StoreError::UsageLimitReached);
        }

        sqlx::query("UPDATE coupons SET used_count = used_count + 1, updated_at = $2 WHERE id = $1")
            .bind(coupon.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let reservation = sqlx::query_as::<_, CouponReservation>(
            r#"
            UPDATE coupon_reservations
            SET status = 'confirmed', confirmed_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(reservation_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn release(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<CouponReservation> {
        let mut tx = self.pool.begin().await?;
        let reservation = sqlx::query_as::<_, CouponReservation>(
            "SELECT * FROM coupon_reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("reservation"))?;

        // Idempotent: anything not still reserved is left untouched, and a
        // confirmed hold is never rolled back here.
        if reservation.status != ReservationStatus::Reserved {
            tx.commit().await?;
            return Ok(reservation);
        }

        let reservation = sqlx::query_as::<_, CouponReservation>(
            r#"
            UPDATE coupon_reservations
            SET status = 'released', released_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(reservation_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(reservation)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE coupon_reservations
            SET status = 'expired'
            WHERE status = 'reserved' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_for_dead_registrations(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE coupon_reservations r
            SET status = 'released', released_at = $1
            FROM registrations g
            WHERE r.registration_id = g.id
              AND r.status = 'reserved'
              AND g.status IN ('abandoned', 'payment_failed')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgRegistrationRepository {
    pool: PgPool,
}

impl PgRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrationRepository for PgRegistrationRepository {
    async fn create(
        &self,
        input: NewRegistration,
        now: DateTime<Utc>,
    ) -> StoreResult<Registration> {
        let registration = sqlx::query_as::<_, Registration>(
            r#"
            INSERT INTO registrations
                (event_id, email, full_name, coupon_code,
                 ticket_price, discount_amount, expected_amount,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(input.event_id)
        .bind(&input.email)
        .bind(&input.full_name)
        .bind(&input.coupon_code)
        .bind(input.ticket_price)
        .bind(input.discount_amount)
        .bind(input.expected_amount)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(registration)
    }

    async fn find(&self, id: Uuid) -> StoreResult<Registration> {
        sqlx::query_as::<_, Registration>(
            "SELECT * FROM registrations WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("registration"))
    }

    async fn find_for_event_email(
        &self,
        event_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Registration>> {
        let registration = sqlx::query_as::<_, Registration>(
            r#"
            SELECT * FROM registrations
            WHERE event_id = $1 AND lower(email) = lower($2) AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(event_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(registration)
    }

    async fn update(&self, registration: &Registration, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET email = $2, full_name = $3, coupon_code = $4,
                ticket_price = $5, discount_amount = $6, expected_amount = $7,
                paid_amount = $8, payment_status = $9, status = $10,
                checkout_session_id = $11, payment_intent_id = $12,
                confirmed_at = $13, updated_at = $14
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(registration.id)
        .bind(&registration.email)
        .bind(&registration.full_name)
        .bind(&registration.coupon_code)
        .bind(registration.ticket_price)
        .bind(registration.discount_amount)
        .bind(registration.expected_amount)
        .bind(registration.paid_amount)
        .bind(registration.payment_status)
        .bind(registration.status)
        .bind(&registration.checkout_session_id)
        .bind(&registration.payment_intent_id)
        .bind(registration.confirmed_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("registration"));
        }
        Ok(())
    }

    async fn confirmed_count(&self, event_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM registrations
            WHERE event_id = $1 AND status = 'confirmed' AND deleted_at IS NULL
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn abandon_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET status = 'abandoned', updated_at = $2
            WHERE status IN ('draft', 'pending_payment')
              AND updated_at <= $1
              AND deleted_at IS NULL
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET deleted_at = $2, payment_status = 'cancelled', updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("registration"));
        }
        Ok(())
    }
}
