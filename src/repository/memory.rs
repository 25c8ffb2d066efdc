//! In-memory store used by the service-level test suites.
//!
//! All four repository traits are implemented on clones of one
//! [`MemoryStore`], which keeps its state behind a single mutex. The
//! confirm/increment critical sections run entirely inside that lock, so
//! concurrent confirmations serialize exactly as the Postgres row lock
//! serializes them and the at-most-N guarantee can be exercised without a
//! database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Coupon, CouponReservation, Event, PaymentStatus, Registration, RegistrationStatus,
    ReservationStatus,
};
use crate::repository::{
    CouponRepository, EventRepository, NewCoupon, NewRegistration, RegistrationRepository,
    ReservationRepository, StoreError, StoreResult,
};

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, Event>,
    coupons: HashMap<Uuid, Coupon>,
    reservations: HashMap<Uuid, CouponReservation>,
    registrations: HashMap<Uuid, Registration>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only happens after a panic in another test thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed helper for tests.
    pub fn insert_event(&self, event: Event) {
        self.lock().events.insert(event.id, event);
    }

    /// Seed helper for tests.
    pub fn insert_coupon(&self, coupon: Coupon) {
        self.lock().coupons.insert(coupon.id, coupon);
    }

    /// Snapshot helper for test assertions.
    pub fn coupon(&self, id: Uuid) -> Option<Coupon> {
        self.lock().coupons.get(&id).cloned()
    }

    /// Snapshot helper for test assertions.
    pub fn reservation(&self, id: Uuid) -> Option<CouponReservation> {
        self.lock().reservations.get(&id).cloned()
    }

    /// Snapshot helper for test assertions.
    pub fn registration(&self, id: Uuid) -> Option<Registration> {
        self.lock().registrations.get(&id).cloned()
    }

    /// All reservations held by a coupon, for test assertions.
    pub fn reservations_for_coupon(&self, coupon_id: Uuid) -> Vec<CouponReservation> {
        self.lock()
            .reservations
            .values()
            .filter(|r| r.coupon_id == coupon_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn find_by_slug(&self, slug: &str) -> StoreResult<Event> {
        self.lock()
            .events
            .values()
            .find(|e| e.slug == slug)
            .cloned()
            .ok_or(StoreError::NotFound("event"))
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self
            .lock()
            .coupons
            .values()
            .find(|c| c.deleted_at.is_none() && c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Coupon> {
        self.lock()
            .coupons
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("coupon"))
    }

    async fn create(&self, input: NewCoupon) -> StoreResult<Coupon> {
        let now = Utc::now();
        let coupon = Coupon {
            id: Uuid::new_v4(),
            event_id: input.event_id,
            code: input.code,
            kind: input.kind,
            value: input.value,
            max_uses: input.max_uses,
            used_count: 0,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            expiry_year: input.expiry_year,
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.lock().coupons.insert(coupon.id, coupon.clone());
        Ok(coupon)
    }

    async fn create_batch(&self, inputs: Vec<NewCoupon>) -> StoreResult<Vec<Coupon>> {
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            created.push(CouponRepository::create(self, input).await?);
        }
        Ok(created)
    }

    async fn increment_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon> {
        let mut inner = self.lock();
        let coupon = inner
            .coupons
            .get_mut(&id)
            .ok_or(StoreError::NotFound("coupon"))?;
        if !coupon.has_uses_remaining() {
            return Err(StoreError::UsageLimitReached);
        }
        coupon.used_count += 1;
        coupon.updated_at = now;
        Ok(coupon.clone())
    }

    async fn decrement_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon> {
        let mut inner = self.lock();
        let coupon = inner
            .coupons
            .get_mut(&id)
            .ok_or(StoreError::NotFound("coupon"))?;
        coupon.used_count = (coupon.used_count - 1).max(0);
        coupon.updated_at = now;
        Ok(coupon.clone())
    }

    async fn active_reservation_count(
        &self,
        coupon_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        Ok(self
            .lock()
            .reservations
            .values()
            .filter(|r| r.coupon_id == coupon_id && r.is_active(now))
            .count() as i64)
    }

    async fn deactivate_expired_years(
        &self,
        current_year: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut changed = 0;
        for coupon in self.lock().coupons.values_mut() {
            if coupon.active
                && coupon.deleted_at.is_none()
                && coupon.expiry_year.is_some_and(|y| y < current_year)
            {
                coupon.active = false;
                coupon.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.lock();
        let coupon = inner
            .coupons
            .get_mut(&id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or(StoreError::NotFound("coupon"))?;
        coupon.deleted_at = Some(now);
        coupon.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn create(
        &self,
        coupon_id: Uuid,
        registration_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<CouponReservation> {
        let mut inner = self.lock();
        // Fresh read of the durable counter; a stale snapshot that raced
        // another confirmation fails here instead of holding phantom
        // capacity.
        let has_uses = inner
            .coupons
            .get(&coupon_id)
            .ok_or(StoreError::NotFound("coupon"))?
            .has_uses_remaining();
        if !has_uses {
            return Err(StoreError::UsageLimitReached);
        }
        let already_active = inner
            .reservations
            .values()
            .any(|r| r.registration_id == registration_id && r.is_active(now));
        if already_active {
            return Err(StoreError::ActiveReservationExists);
        }
        let reservation = CouponReservation {
            id: Uuid::new_v4(),
            coupon_id,
            registration_id,
            status: ReservationStatus::Reserved,
            expires_at,
            confirmed_at: None,
            released_at: None,
            created_at: now,
        };
        inner.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn find(&self, id: Uuid) -> StoreResult<CouponReservation> {
        self.lock()
            .reservations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("reservation"))
    }

    async fn find_active_for_registration(
        &self,
        registration_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CouponReservation>> {
        Ok(self
            .lock()
            .reservations
            .values()
            .filter(|r| r.registration_id == registration_id && r.is_active(now))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_latest_for_registration(
        &self,
        registration_id: Uuid,
    ) -> StoreResult<Option<CouponReservation>> {
        Ok(self
            .lock()
            .reservations
            .values()
            .filter(|r| r.registration_id == registration_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn confirm_and_redeem(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<CouponReservation> {
        // Whole section under one lock, mirroring the Postgres transaction.
        let mut inner = self.lock();
        let reservation = inner
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(StoreError::NotFound("reservation"))?;

        match reservation.status {
            ReservationStatus::Confirmed => return Ok(reservation),
            ReservationStatus::Released => {
                return Err(StoreError::ReservationNotConfirmable("released"));
            }
            ReservationStatus::Reserved | ReservationStatus::Expired => {}
        }

        let coupon = inner
            .coupons
            .get_mut(&reservation.coupon_id)
            .ok_or(StoreError::NotFound("coupon"))?;
        if !coupon.has_uses_remaining() {
            return Err(StoreError::UsageLimitReached);
        }
        coupon.used_count += 1;
        coupon.updated_at = now;

        let reservation = inner
            .reservations
            .get_mut(&reservation_id)
            .ok_or(StoreError::NotFound("reservation"))?;
        reservation.status = ReservationStatus::Confirmed;
        reservation.confirmed_at = Some(now);
        Ok(reservation.clone())
    }

    async fn release(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<CouponReservation> {
        let mut inner = self.lock();
        let reservation = inner
            .reservations
            .get_mut(&reservation_id)
            .ok_or(StoreError::NotFound("reservation"))?;
        if reservation.status == ReservationStatus::Reserved {
            reservation.status = ReservationStatus::Released;
            reservation.released_at = Some(now);
        }
        Ok(reservation.clone())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut expired = 0;
        for reservation in self.lock().reservations.values_mut() {
            if reservation.status == ReservationStatus::Reserved && reservation.expires_at <= now {
                reservation.status = ReservationStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn release_for_dead_registrations(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.lock();
        let dead: Vec<Uuid> = inner
            .registrations
            .values()
            .filter(|r| {
                matches!(
                    r.status,
                    RegistrationStatus::Abandoned | RegistrationStatus::PaymentFailed
                )
            })
            .map(|r| r.id)
            .collect();
        let mut released = 0;
        for reservation in inner.reservations.values_mut() {
            if reservation.status == ReservationStatus::Reserved
                && dead.contains(&reservation.registration_id)
            {
                reservation.status = ReservationStatus::Released;
                reservation.released_at = Some(now);
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl RegistrationRepository for MemoryStore {
    async fn create(
        &self,
        input: NewRegistration,
        now: DateTime<Utc>,
    ) -> StoreResult<Registration> {
        let registration = Registration {
            id: Uuid::new_v4(),
            event_id: input.event_id,
            email: input.email,
            full_name: input.full_name,
            coupon_code: input.coupon_code,
            ticket_price: input.ticket_price,
            discount_amount: input.discount_amount,
            expected_amount: input.expected_amount,
            paid_amount: Decimal::ZERO,
            payment_status: PaymentStatus::Pending,
            status: RegistrationStatus::Draft,
            checkout_session_id: None,
            payment_intent_id: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.lock()
            .registrations
            .insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn find(&self, id: Uuid) -> StoreResult<Registration> {
        self.lock()
            .registrations
            .get(&id)
            .filter(|r| r.deleted_at.is_none())
            .cloned()
            .ok_or(StoreError::NotFound("registration"))
    }

    async fn find_for_event_email(
        &self,
        event_id: Uuid,
        email: &str,
    ) -> StoreResult<Option<Registration>> {
        Ok(self
            .lock()
            .registrations
            .values()
            .filter(|r| {
                r.deleted_at.is_none()
                    && r.event_id == event_id
                    && r.email.eq_ignore_ascii_case(email)
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update(&self, registration: &Registration, now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.lock();
        let stored = inner
            .registrations
            .get_mut(&registration.id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or(StoreError::NotFound("registration"))?;
        *stored = registration.clone();
        stored.updated_at = now;
        Ok(())
    }

    async fn confirmed_count(&self, event_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .lock()
            .registrations
            .values()
            .filter(|r| {
                r.deleted_at.is_none()
                    && r.event_id == event_id
                    && r.status == RegistrationStatus::Confirmed
            })
            .count() as i64)
    }

    async fn abandon_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut changed = 0;
        for registration in self.lock().registrations.values_mut() {
            if registration.deleted_at.is_none()
                && matches!(
                    registration.status,
                    RegistrationStatus::Draft | RegistrationStatus::PendingPayment
                )
                && registration.updated_at <= cutoff
            {
                registration.status = RegistrationStatus::Abandoned;
                registration.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.lock();
        let registration = inner
            .registrations
            .get_mut(&id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or(StoreError::NotFound("registration"))?;
        registration.deleted_at = Some(now);
        registration.payment_status = PaymentStatus::Cancelled;
        registration.updated_at = now;
        Ok(())
    }
}
