pub mod checkout;
pub mod ledger;
pub mod reaper;
pub mod reservations;

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub use checkout::{
    CheckoutConfig, CheckoutError, CheckoutService, CompleteOutcome, InitiateCheckout,
    InitiateOutcome, WebhookOutcome,
};
pub use ledger::{CouponLedger, LedgerError, PricingPreview};
pub use reaper::{Reaper, ReaperReport};
pub use reservations::ReservationManager;

/// Injected time source so TTL and expiry logic is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
