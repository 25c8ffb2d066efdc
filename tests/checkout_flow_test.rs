//! End-to-end state machine flows over the in-memory store.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{checkout_over, seed_coupon, seed_event, start_time, test_app, test_app_with};
use rust_decimal_macros::dec;
use uuid::Uuid;

use tessera_server::gateway::GatewayEvent;
use tessera_server::models::{
    Coupon, CouponRejection, DiscountKind, PaymentStatus, RegistrationStatus, ReservationStatus,
};
use tessera_server::repository::memory::MemoryStore;
use tessera_server::repository::{CouponRepository, NewCoupon, StoreError, StoreResult};
use tessera_server::services::checkout::InitiateCheckout;
use tessera_server::services::{CheckoutError, CompleteOutcome, WebhookOutcome};

fn attendee(coupon_code: Option<&str>) -> InitiateCheckout {
    InitiateCheckout {
        email: "ada@example.org".into(),
        full_name: "Ada Lovelace".into(),
        coupon_code: coupon_code.map(str::to_string),
    }
}

#[tokio::test]
async fn percentage_coupon_previews_discounted_price() {
    let app = test_app(dec!(100));
    seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        None,
    );

    let preview = app
        .checkout
        .validate_coupon("rustconf-2026", "TWENTY")
        .await
        .unwrap();
    assert_eq!(preview.ticket_price, dec!(100));
    assert_eq!(preview.discount_amount, dec!(20.00));
    assert_eq!(preview.final_price, dec!(80.00));
}

#[tokio::test]
async fn coupon_lookup_is_case_insensitive() {
    let app = test_app(dec!(100));
    seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        None,
    );

    let preview = app
        .checkout
        .validate_coupon("rustconf-2026", "twenty")
        .await
        .unwrap();
    assert_eq!(preview.final_price, dec!(80.00));
}

#[tokio::test]
async fn oversized_fixed_coupon_floors_price_at_zero() {
    let app = test_app(dec!(100));
    seed_coupon(&app.store, "COMP150", DiscountKind::Fixed, dec!(150), None);

    let preview = app
        .checkout
        .validate_coupon("rustconf-2026", "COMP150")
        .await
        .unwrap();
    assert_eq!(preview.discount_amount, dec!(100));
    assert_eq!(preview.final_price, dec!(0));
}

#[tokio::test]
async fn unknown_coupon_is_rejected_with_specific_reason() {
    let app = test_app(dec!(100));
    let err = app
        .checkout
        .validate_coupon("rustconf-2026", "NOPE")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Coupon(CouponRejection::InvalidCode)
    ));
}

#[tokio::test]
async fn free_checkout_confirms_on_the_spot() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(&app.store, "COMP150", DiscountKind::Fixed, dec!(150), None);

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("COMP150")))
        .await
        .unwrap();
    assert_eq!(outcome.registration.status, RegistrationStatus::Draft);
    assert_eq!(outcome.registration.expected_amount, dec!(0));
    assert!(outcome.coupon_rejection.is_none());

    let completed = app
        .checkout
        .complete("rustconf-2026", outcome.registration.id)
        .await
        .unwrap();
    let registration = match completed {
        CompleteOutcome::Confirmed(r) => r,
        other => panic!("expected confirmation, got {other:?}"),
    };
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
    assert_eq!(registration.payment_status, PaymentStatus::Paid);
    assert_eq!(registration.paid_amount, dec!(0));
    assert!(registration.confirmed_at.is_some());

    // Confirmation durably consumed the coupon.
    assert_eq!(app.store.coupon(coupon.id).unwrap().used_count, 1);
    let holds = app.store.reservations_for_coupon(coupon.id);
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].status, ReservationStatus::Confirmed);

    // One-shot completion side effects fired.
    assert_eq!(app.crm.calls(), vec![("ada@example.org".into(), "test-list".into())]);
    // No gateway session for a free registration.
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn paid_checkout_runs_through_gateway_webhooks() {
    let app = test_app(dec!(100));

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    let id = outcome.registration.id;

    let completed = app.checkout.complete("rustconf-2026", id).await.unwrap();
    let url = match completed {
        CompleteOutcome::RedirectToPayment { url, registration } => {
            assert_eq!(registration.status, RegistrationStatus::PendingPayment);
            url
        }
        other => panic!("expected redirect, got {other:?}"),
    };
    assert!(url.starts_with("https://checkout.example.test/"));
    let requests = app.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, dec!(100));
    assert_eq!(requests[0].registration_id, id);

    app.checkout
        .apply_gateway_event(GatewayEvent::CheckoutCompleted {
            registration_id: id,
            session_id: Some("cs_123".into()),
            payment_intent_id: Some("pi_456".into()),
        })
        .await
        .unwrap();
    let registration = app.store.registration(id).unwrap();
    assert_eq!(registration.status, RegistrationStatus::PaymentProcessing);
    assert_eq!(registration.payment_intent_id.as_deref(), Some("pi_456"));

    let outcome = app
        .checkout
        .apply_gateway_event(GatewayEvent::PaymentSucceeded {
            registration_id: id,
            amount: dec!(100),
        })
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Applied {
            confirmed_now: true,
            ..
        }
    ));

    let registration = app.store.registration(id).unwrap();
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
    assert_eq!(registration.payment_status, PaymentStatus::Paid);
    assert_eq!(registration.paid_amount, dec!(100));
    assert_eq!(app.crm.calls().len(), 1);
}

#[tokio::test]
async fn partial_capture_is_never_flagged_paid() {
    let app = test_app(dec!(100));
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    let id = outcome.registration.id;
    app.checkout.complete("rustconf-2026", id).await.unwrap();
    app.checkout
        .apply_gateway_event(GatewayEvent::CheckoutCompleted {
            registration_id: id,
            session_id: None,
            payment_intent_id: None,
        })
        .await
        .unwrap();

    app.checkout
        .apply_gateway_event(GatewayEvent::PartiallyFunded {
            registration_id: id,
            amount: dec!(30),
        })
        .await
        .unwrap();

    let registration = app.store.registration(id).unwrap();
    // Status unchanged, payment recorded as partial.
    assert_eq!(registration.status, RegistrationStatus::PaymentProcessing);
    assert_eq!(registration.payment_status, PaymentStatus::Partial);
    assert_eq!(registration.paid_amount, dec!(30));
}

#[tokio::test]
async fn failed_payment_releases_hold_and_permits_retry() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        Some(5),
    );

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();
    let id = outcome.registration.id;
    app.checkout.complete("rustconf-2026", id).await.unwrap();
    app.checkout
        .apply_gateway_event(GatewayEvent::CheckoutCompleted {
            registration_id: id,
            session_id: None,
            payment_intent_id: None,
        })
        .await
        .unwrap();

    app.checkout
        .apply_gateway_event(GatewayEvent::PaymentFailed {
            registration_id: id,
        })
        .await
        .unwrap();

    let registration = app.store.registration(id).unwrap();
    assert_eq!(registration.status, RegistrationStatus::PaymentFailed);
    assert_eq!(registration.payment_status, PaymentStatus::Failed);
    // Hold went back to the pool, counter untouched.
    let holds = app.store.reservations_for_coupon(coupon.id);
    assert_eq!(holds[0].status, ReservationStatus::Released);
    assert_eq!(app.store.coupon(coupon.id).unwrap().used_count, 0);

    // Retry: same email re-initiates the same row.
    let retried = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();
    assert_eq!(retried.registration.id, id);
    assert_eq!(retried.registration.status, RegistrationStatus::Draft);
}

#[tokio::test]
async fn expired_checkout_session_abandons_registration() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        Some(5),
    );
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();
    let id = outcome.registration.id;
    app.checkout.complete("rustconf-2026", id).await.unwrap();

    app.checkout
        .apply_gateway_event(GatewayEvent::CheckoutExpired {
            registration_id: id,
        })
        .await
        .unwrap();

    let registration = app.store.registration(id).unwrap();
    assert_eq!(registration.status, RegistrationStatus::Abandoned);
    let holds = app.store.reservations_for_coupon(coupon.id);
    assert_eq!(holds[0].status, ReservationStatus::Released);
}

#[tokio::test]
async fn rejected_coupon_degrades_to_full_price() {
    let app = test_app(dec!(100));
    let mut coupon = seed_coupon(
        &app.store,
        "OLD",
        DiscountKind::Percentage,
        dec!(50),
        None,
    );
    coupon.active = false;
    app.store.insert_coupon(coupon);

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("OLD")))
        .await
        .unwrap();
    assert_eq!(outcome.coupon_rejection, Some(CouponRejection::Inactive));
    assert_eq!(outcome.registration.expected_amount, dec!(100));
    assert!(outcome.registration.coupon_code.is_none());
}

#[tokio::test]
async fn gateway_session_failure_is_fatal() {
    let app = test_app(dec!(100));
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();

    app.gateway.fail_next_requests(true);
    let err = app
        .checkout
        .complete("rustconf-2026", outcome.registration.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Gateway(_)));
    // Registration stays draft so completion can be retried.
    let registration = app.store.registration(outcome.registration.id).unwrap();
    assert_eq!(registration.status, RegistrationStatus::Draft);
}

#[tokio::test]
async fn confirmed_email_blocks_re_registration() {
    let app = test_app(dec!(0));
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    app.checkout.complete("rustconf-2026", outcome.registration.id).await.unwrap();

    let err = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::DuplicateEmail));
}

#[tokio::test]
async fn re_initiation_updates_draft_in_place_and_releases_old_hold() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(
        &app.store,
        "TWENTY",
        DiscountKind::Percentage,
        dec!(20),
        Some(1),
    );

    let first = app
        .checkout
        .initiate("rustconf-2026", attendee(Some("TWENTY")))
        .await
        .unwrap();
    // Same attendee comes back without the coupon.
    let second = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();

    assert_eq!(first.registration.id, second.registration.id);
    assert_eq!(second.registration.expected_amount, dec!(100));
    let holds = app.store.reservations_for_coupon(coupon.id);
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].status, ReservationStatus::Released);
}

#[tokio::test]
async fn outstanding_hold_counts_against_remaining_uses() {
    let app = test_app(dec!(100));
    seed_coupon(&app.store, "LAST1", DiscountKind::Percentage, dec!(50), Some(1));

    // First attendee takes a hold on the only use; the durable counter is
    // still zero.
    app.checkout
        .initiate("rustconf-2026", attendee(Some("LAST1")))
        .await
        .unwrap();

    let err = app
        .checkout
        .validate_coupon("rustconf-2026", "LAST1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Coupon(CouponRejection::UsageLimitReached)
    ));

    // A second attendee still gets through, at full price.
    let outcome = app
        .checkout
        .initiate(
            "rustconf-2026",
            InitiateCheckout {
                email: "grace@example.org".into(),
                full_name: "Grace Hopper".into(),
                coupon_code: Some("LAST1".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        outcome.coupon_rejection,
        Some(CouponRejection::UsageLimitReached)
    );
    assert_eq!(outcome.registration.expected_amount, dec!(100));
}

/// Serves a coupon read taken before another checkout advanced the counter;
/// everything else hits the live store.
#[derive(Clone)]
struct SnapshotCoupons {
    live: MemoryStore,
    snapshot: Coupon,
}

#[async_trait]
impl CouponRepository for SnapshotCoupons {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        if self.snapshot.code.eq_ignore_ascii_case(code) {
            return Ok(Some(self.snapshot.clone()));
        }
        self.live.find_by_code(code).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Coupon> {
        CouponRepository::find_by_id(&self.live, id).await
    }

    async fn create(&self, input: NewCoupon) -> StoreResult<Coupon> {
        CouponRepository::create(&self.live, input).await
    }

    async fn create_batch(&self, inputs: Vec<NewCoupon>) -> StoreResult<Vec<Coupon>> {
        self.live.create_batch(inputs).await
    }

    async fn increment_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon> {
        self.live.increment_usage(id, now).await
    }

    async fn decrement_usage(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Coupon> {
        self.live.decrement_usage(id, now).await
    }

    async fn active_reservation_count(
        &self,
        coupon_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        self.live.active_reservation_count(coupon_id, now).await
    }

    async fn deactivate_expired_years(
        &self,
        current_year: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.live.deactivate_expired_years(current_year, now).await
    }

    async fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        CouponRepository::soft_delete(&self.live, id, now).await
    }
}

#[tokio::test]
async fn initiate_falls_back_when_the_hold_loses_the_race() {
    let app = test_app(dec!(100));
    let coupon = seed_coupon(&app.store, "LAST1", DiscountKind::Fixed, dec!(20), Some(1));

    // Validation reads this snapshot, then another checkout spends the last
    // use before the hold is placed.
    let snapshot = coupon.clone();
    CouponRepository::increment_usage(&app.store, coupon.id, start_time())
        .await
        .unwrap();

    let checkout = checkout_over(
        &app.store,
        SnapshotCoupons {
            live: app.store.clone(),
            snapshot,
        },
        app.clock.clone(),
    );
    let outcome = checkout
        .initiate("rustconf-2026", attendee(Some("LAST1")))
        .await
        .unwrap();

    assert_eq!(
        outcome.coupon_rejection,
        Some(CouponRejection::UsageLimitReached)
    );
    assert_eq!(outcome.registration.expected_amount, dec!(100));
    assert!(outcome.registration.coupon_code.is_none());
    // No hold was placed on the spent capacity.
    assert!(app.store.reservations_for_coupon(coupon.id).is_empty());
}

#[tokio::test]
async fn completion_is_scoped_to_the_event_in_the_url() {
    let app = test_app(dec!(100));
    seed_event(&app.store, "other-conf", dec!(50));

    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    let id = outcome.registration.id;

    let err = app.checkout.complete("other-conf", id).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Store(StoreError::NotFound(_))
    ));
    // Still completable through its own event.
    let completed = app.checkout.complete("rustconf-2026", id).await.unwrap();
    assert!(matches!(completed, CompleteOutcome::RedirectToPayment { .. }));
}

#[tokio::test]
async fn sold_out_event_rejects_initiation() {
    let app = test_app_with(dec!(0), Some(1));
    let outcome = app
        .checkout
        .initiate("rustconf-2026", attendee(None))
        .await
        .unwrap();
    app.checkout.complete("rustconf-2026", outcome.registration.id).await.unwrap();

    let err = app
        .checkout
        .initiate(
            "rustconf-2026",
            InitiateCheckout {
                email: "grace@example.org".into(),
                full_name: "Grace Hopper".into(),
                coupon_code: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::SoldOut));
}
