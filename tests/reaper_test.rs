//! Reaper sweep: reclaiming expired holds, stale drafts and orphaned
//! reservations, plus the year-rollover job.

mod common;

use chrono::Duration;
use common::{seed_coupon, test_app};
use rust_decimal_macros::dec;

use tessera_server::models::{DiscountKind, RegistrationStatus, ReservationStatus};
use tessera_server::repository::RegistrationRepository;
use tessera_server::services::checkout::InitiateCheckout;
use tessera_server::services::{Clock, ReaperReport};

fn attendee(coupon_code: Option<&str>) -> InitiateCheckout {
    InitiateCheckout {
        email: "ada@example.org".into(),
        full_name: "Ada Lovelace".into(),
        coupon_code: coupon_code.map(str::to_string),
    }
}

#[tokio::test]
async fn stale_pending_payment_is_abandoned_and_hold_reclaimed() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        Some(1),
    );

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();
    let id = outcome.registration.id;
    app.checkout.complete("rustconf-2026", id).await.unwrap();

    // Attendee walks away; 25 hours pass.
    app.clock.advance(Duration::hours(25));
    let report = app.reaper.run().await;

    assert_eq!(
        report,
        ReaperReport {
            expired_reservations: 1,
            abandoned_registrations: 1,
            released_reservations: 0,
        }
    );

    let registration = app.store.registration(id).unwrap();
    assert_eq!(registration.status, RegistrationStatus::Abandoned);
    let holds = app.store.reservations_for_coupon(coupon.id);
    assert_eq!(holds[0].status, ReservationStatus::Expired);
    // Capacity is back: the counter never moved and no hold is active.
    assert_eq!(app.store.coupon(coupon.id).unwrap().used_count, 0);

    // The freed use is visible to the next attendee immediately.
    let preview = app
        .checkout
        .validate_coupon("rustconf-2026", "TWENTY")
        .await
        .unwrap();
    assert_eq!(preview.final_price, dec!(80.00));
}

#[tokio::test]
async fn holds_of_dead_registrations_are_released() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        Some(1),
    );

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();

    // Registration dies out-of-band while its hold is still fresh.
    let mut registration = outcome.registration;
    registration.status = RegistrationStatus::Abandoned;
    app.store
        .update(&registration, app.clock.now())
        .await
        .unwrap();

    app.clock.advance(Duration::minutes(5));
    let report = app.reaper.run().await;

    assert_eq!(
        report,
        ReaperReport {
            expired_reservations: 0,
            abandoned_registrations: 0,
            released_reservations: 1,
        }
    );
    let holds = app.store.reservations_for_coupon(coupon.id);
    assert_eq!(holds[0].status, ReservationStatus::Released);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let app = test_app(dec!(100));
    seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        Some(1),
    );
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();
    app.checkout.complete("rustconf-2026", outcome.registration.id).await.unwrap();

    app.clock.advance(Duration::hours(25));
    let first = app.reaper.run().await;
    assert_ne!(first, ReaperReport::default());

    let second = app.reaper.run().await;
    assert_eq!(second, ReaperReport::default());
}

#[tokio::test]
async fn fresh_drafts_survive_the_sweep() {
    let app = test_app(dec!(100));
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();

    app.clock.advance(Duration::hours(2));
    let report = app.reaper.run().await;

    assert_eq!(report, ReaperReport::default());
    assert_eq!(
        app.store.registration(outcome.registration.id).unwrap().status,
        RegistrationStatus::Draft
    );
}

#[tokio::test]
async fn re_initiated_old_draft_survives_the_sweep() {
    let app = test_app(dec!(100));
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    let id = outcome.registration.id;

    // Attendee comes back a day later and starts over on the same row.
    app.clock.advance(Duration::hours(25));
    let retried = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    assert_eq!(retried.registration.id, id);

    // A sweep minutes later must not reap the checkout in progress.
    app.clock.advance(Duration::minutes(5));
    let report = app.reaper.run().await;

    assert_eq!(report.abandoned_registrations, 0);
    assert_eq!(
        app.store.registration(id).unwrap().status,
        RegistrationStatus::Draft
    );
}

#[tokio::test]
async fn year_rollover_deactivates_expired_coupons() {
    let app = test_app(dec!(100));
    let mut expired = seed_coupon(
        &app.store,
        "SPONSOR2025",
        DiscountKind::Fixed,
        dec!(100),
        None,
    );
    expired.expiry_year = Some(2025);
    app.store.insert_coupon(expired.clone());
    let mut current = seed_coupon(
        &app.store,
        "SPONSOR2026",
        DiscountKind::Fixed,
        dec!(100),
        None,
    );
    current.expiry_year = Some(2026);
    app.store.insert_coupon(current.clone());

    // Clock is mid-2026.
    assert_eq!(app.reaper.run_year_rollover().await, 1);
    assert!(!app.store.coupon(expired.id).unwrap().active);
    assert!(app.store.coupon(current.id).unwrap().active);

    // Nothing left to do on the next pass.
    assert_eq!(app.reaper.run_year_rollover().await, 0);
}
