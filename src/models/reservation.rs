use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored as plain text, hence the `varchar` type name for binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,
    Confirmed,
    Released,
    Expired,
}

/// A soft, time-boxed hold linking one coupon to one in-flight registration.
///
/// Holds never touch the coupon's durable `used_count`; only confirmation
/// does, under a row lock. At most one active hold exists per registration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponReservation {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub registration_id: Uuid,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CouponReservation {
    /// Still holding capacity: reserved and not past its TTL.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Reserved && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(status: ReservationStatus, expires_at: DateTime<Utc>) -> CouponReservation {
        CouponReservation {
            id: Uuid::new_v4(),
            coupon_id: Uuid::new_v4(),
            registration_id: Uuid::new_v4(),
            status,
            expires_at,
            confirmed_at: None,
            released_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reserved_within_ttl_is_active() {
        let now = Utc::now();
        let r = reservation(ReservationStatus::Reserved, now + Duration::minutes(30));
        assert!(r.is_active(now));
    }

    #[test]
    fn reserved_past_ttl_is_not_active() {
        let now = Utc::now();
        let r = reservation(ReservationStatus::Reserved, now - Duration::minutes(1));
        assert!(!r.is_active(now));
    }

    #[test]
    fn status_binds_against_text_columns() {
        use sqlx::{Postgres, Type, TypeInfo};
        let info = <ReservationStatus as Type<Postgres>>::type_info();
        assert!(info.name().eq_ignore_ascii_case("varchar"));
    }

    #[test]
    fn terminal_statuses_are_never_active() {
        let now = Utc::now();
        for status in [
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            let r = reservation(status, now + Duration::minutes(30));
            assert!(!r.is_active(now));
        }
    }
}
