use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// How a coupon reduces the ticket price.
///
/// Stored as plain text; `type_name` keeps bind parameters resolving
/// against the text column instead of a nonexistent Postgres enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is a percentage of the ticket price (0-100).
    Percentage,
    /// `value` is an absolute amount, capped at the ticket price.
    Fixed,
}

/// Why a coupon code was rejected during validation.
///
/// Checks run in a fixed order and the first failing check wins, so the
/// caller can show the end user the precise reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("coupon code not found")]
    InvalidCode,
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon is not valid yet")]
    NotYetValid,
    #[error("coupon usage limit reached")]
    UsageLimitReached,
    #[error("coupon is not valid for this event")]
    WrongEventScope,
}

impl CouponRejection {
    /// Machine-readable reason string surfaced in API error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            CouponRejection::InvalidCode => "COUPON_INVALID_CODE",
            CouponRejection::Inactive => "COUPON_INACTIVE",
            CouponRejection::Expired => "COUPON_EXPIRED",
            CouponRejection::NotYetValid => "COUPON_NOT_YET_VALID",
            CouponRejection::UsageLimitReached => "COUPON_USAGE_LIMIT_REACHED",
            CouponRejection::WrongEventScope => "COUPON_WRONG_EVENT",
        }
    }
}

/// A discount definition with a durable usage counter.
///
/// `used_count` is mutated only by the reservation manager's confirm/release
/// operations, always under a row lock, never below zero and never past
/// `max_uses`. Rows are soft-deleted so usage history survives.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: Uuid,
    /// When set, the coupon is only valid for this event.
    pub event_id: Option<Uuid>,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub expiry_year: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Coupon {
    /// Runs the eligibility checks that do not depend on outstanding
    /// reservations, in their fixed order. The usage-limit check here only
    /// consults the durable counter; effective-remaining accounting is the
    /// ledger's job.
    pub fn check_eligibility(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), CouponRejection> {
        if !self.active {
            return Err(CouponRejection::Inactive);
        }
        if let Some(year) = self.expiry_year {
            if now.year() > year {
                return Err(CouponRejection::Expired);
            }
        }
        if let Some(until) = self.valid_until {
            if now > until {
                return Err(CouponRejection::Expired);
            }
        }
        if let Some(from) = self.valid_from {
            if now < from {
                return Err(CouponRejection::NotYetValid);
            }
        }
        if let Some(scope) = self.event_id {
            if scope != event_id {
                return Err(CouponRejection::WrongEventScope);
            }
        }
        if !self.has_uses_remaining() {
            return Err(CouponRejection::UsageLimitReached);
        }
        Ok(())
    }

    /// Uses remaining against the durable counter only.
    pub fn has_uses_remaining(&self) -> bool {
        match self.max_uses {
            Some(limit) => self.used_count < limit,
            None => true,
        }
    }

    /// Remaining durable uses, `None` when unlimited.
    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_uses.map(|limit| (limit - self.used_count).max(0))
    }

    /// Discount for a given price. Pure: same inputs, same amount.
    ///
    /// Percentage discounts round half-away-from-zero to two decimals.
    /// Fixed discounts never exceed the price.
    pub fn calculate_discount(&self, price: Decimal) -> Decimal {
        match self.kind {
            DiscountKind::Percentage => (price * self.value / Decimal::from(100))
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            DiscountKind::Fixed => self.value.min(price),
        }
    }

    /// Price after discount, floored at zero.
    pub fn apply_discount(&self, price: Decimal) -> Decimal {
        (price - self.calculate_discount(price)).max(Decimal::ZERO)
    }

    /// Random code for bulk generation, e.g. `SPRING-7K2N9QXB`.
    pub fn generate_code(prefix: &str) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        if prefix.is_empty() {
            suffix
        } else {
            format!("{}-{}", prefix.to_uppercase(), suffix)
        }
    }
}
