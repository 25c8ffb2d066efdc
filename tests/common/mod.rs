//! Shared harness: the full checkout service wired over the in-memory
//! store, a settable clock and the mock gateway.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use tessera_server::crm::RecordingCrm;
use tessera_server::gateway::mock::MockGateway;
use tessera_server::gateway::PaymentGateway;
use tessera_server::models::{Coupon, DiscountKind, Event, EventSettings};
use tessera_server::notify::{ConfirmationDispatcher, LoggingMailer};
use tessera_server::repository::memory::MemoryStore;
use tessera_server::repository::CouponRepository;
use tessera_server::services::{
    CheckoutConfig, CheckoutService, Clock, CouponLedger, FixedClock, Reaper, ReservationManager,
};

pub type MemoryCheckout = CheckoutService<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;
pub type MemoryReaper = Reaper<MemoryStore, MemoryStore, MemoryStore>;

pub struct TestApp {
    pub store: MemoryStore,
    pub clock: Arc<FixedClock>,
    pub gateway: MockGateway,
    pub crm: RecordingCrm,
    pub checkout: MemoryCheckout,
    pub reaper: MemoryReaper,
    pub event: Event,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

pub fn test_app(ticket_price: Decimal) -> TestApp {
    test_app_with(ticket_price, None)
}

pub fn test_app_with(ticket_price: Decimal, capacity: Option<i32>) -> TestApp {
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::at(start_time()));
    let gateway = MockGateway::new();
    let crm = RecordingCrm::new();

    let now = start_time();
    let event = Event {
        id: Uuid::new_v4(),
        slug: "rustconf-2026".into(),
        name: "RustConf 2026".into(),
        ticket_price,
        currency: "eur".into(),
        capacity,
        settings: sqlx::types::Json(EventSettings::default()),
        created_at: now,
        updated_at: now,
    };
    store.insert_event(event.clone());

    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let ledger = CouponLedger::new(store.clone(), clock_dyn.clone());
    let manager =
        ReservationManager::new(store.clone(), clock_dyn.clone(), Duration::minutes(30));
    let gateway_dyn: Arc<dyn PaymentGateway> = Arc::new(gateway.clone());
    let dispatcher = ConfirmationDispatcher::new(
        Arc::new(LoggingMailer),
        Arc::new(crm.clone()),
        "test-list".into(),
    );

    let checkout = CheckoutService::new(
        store.clone(),
        ledger,
        manager,
        store.clone(),
        gateway_dyn,
        dispatcher,
        clock_dyn.clone(),
        CheckoutConfig {
            success_url: "https://example.test/success".into(),
            cancel_url: "https://example.test/cancel".into(),
        },
    );

    let reaper = Reaper::new(
        store.clone(),
        store.clone(),
        store.clone(),
        clock_dyn,
        Duration::hours(24),
    );

    TestApp {
        store,
        clock,
        gateway,
        crm,
        checkout,
        reaper,
        event,
    }
}

/// Seed helper for a second event alongside the default one.
pub fn seed_event(store: &MemoryStore, slug: &str, ticket_price: Decimal) -> Event {
    let now = start_time();
    let event = Event {
        id: Uuid::new_v4(),
        slug: slug.into(),
        name: slug.into(),
        ticket_price,
        currency: "eur".into(),
        capacity: None,
        settings: sqlx::types::Json(EventSettings::default()),
        created_at: now,
        updated_at: now,
    };
    store.insert_event(event.clone());
    event
}

/// Checkout service over `store` but reading coupons through a
/// caller-supplied repository, for exercising stale-read races.
pub fn checkout_over<C: CouponRepository>(
    store: &MemoryStore,
    coupons: C,
    clock: Arc<FixedClock>,
) -> CheckoutService<MemoryStore, C, MemoryStore, MemoryStore> {
    let clock_dyn: Arc<dyn Clock> = clock;
    let ledger = CouponLedger::new(coupons, clock_dyn.clone());
    let manager =
        ReservationManager::new(store.clone(), clock_dyn.clone(), Duration::minutes(30));
    let dispatcher = ConfirmationDispatcher::new(
        Arc::new(LoggingMailer),
        Arc::new(RecordingCrm::new()),
        "test-list".into(),
    );
    CheckoutService::new(
        store.clone(),
        ledger,
        manager,
        store.clone(),
        Arc::new(MockGateway::new()),
        dispatcher,
        clock_dyn,
        CheckoutConfig {
            success_url: "https://example.test/success".into(),
            cancel_url: "https://example.test/cancel".into(),
        },
    )
}

pub fn seed_coupon(
    store: &MemoryStore,
    code: &str,
    kind: DiscountKind,
    value: Decimal,
    max_uses: Option<i32>,
) -> Coupon {
    let now = start_time();
    let coupon = Coupon {
        id: Uuid::new_v4(),
        event_id: None,
        code: code.into(),
        kind,
        value,
        max_uses,
        used_count: 0,
        valid_from: None,
        valid_until: None,
        expiry_year: None,
        active: true,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    store.insert_coupon(coupon.clone());
    coupon
}
