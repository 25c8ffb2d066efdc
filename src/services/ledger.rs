//! Coupon ledger: eligibility validation and discount math over the
//! authoritative coupon records.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Coupon, CouponRejection, Event};
use crate::repository::{CouponRepository, StoreError};
use crate::services::Clock;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Rejected(#[from] CouponRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the checkout UI shows before any mutation happens.
#[derive(Debug, Clone, Serialize)]
pub struct PricingPreview {
    pub ticket_price: Decimal,
    pub discount_amount: Decimal,
    pub final_price: Decimal,
    pub coupon_code: Option<String>,
}

impl PricingPreview {
    pub fn without_coupon(ticket_price: Decimal) -> Self {
        Self {
            ticket_price,
            discount_amount: Decimal::ZERO,
            final_price: ticket_price,
            coupon_code: None,
        }
    }

    pub fn with_coupon(ticket_price: Decimal, coupon: &Coupon) -> Self {
        Self {
            ticket_price,
            discount_amount: coupon.calculate_discount(ticket_price),
            final_price: coupon.apply_discount(ticket_price),
            coupon_code: Some(coupon.code.clone()),
        }
    }
}

pub struct CouponLedger<C> {
    coupons: C,
    clock: Arc<dyn Clock>,
}

impl<C: CouponRepository> CouponLedger<C> {
    pub fn new(coupons: C, clock: Arc<dyn Clock>) -> Self {
        Self { coupons, clock }
    }

    /// Full eligibility check in fixed order; the first failing check is the
    /// rejection the user sees. The usage-limit check here is the
    /// user-facing one: it counts outstanding unexpired holds on top of the
    /// durable counter ("effective remaining"), so an optimistic preview
    /// does not promise capacity other in-flight checkouts already hold.
    pub async fn validate(&self, event: &Event, code: &str) -> Result<Coupon, LedgerError> {
        let now = self.clock.now();
        let coupon = self
            .coupons
            .find_by_code(code)
            .await?
            .ok_or(CouponRejection::InvalidCode)?;

        coupon.check_eligibility(event.id, now)?;

        if let Some(limit) = coupon.max_uses {
            let holds = self
                .coupons
                .active_reservation_count(coupon.id, now)
                .await?;
            if i64::from(coupon.used_count) + holds >= i64::from(limit) {
                return Err(CouponRejection::UsageLimitReached.into());
            }
        }

        Ok(coupon)
    }

    /// Pricing preview for the validate endpoint; no mutation.
    pub async fn preview(&self, event: &Event, code: &str) -> Result<PricingPreview, LedgerError> {
        let coupon = self.validate(event, code).await?;
        Ok(PricingPreview::with_coupon(event.ticket_price, &coupon))
    }
}
