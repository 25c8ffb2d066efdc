//! Registration state machine.
//!
//! Drives a registration draft → pending_payment → payment_processing →
//! confirmed, with side exits to abandoned and payment_failed, coordinating
//! the coupon ledger, the reservation manager and the payment gateway.
//! Webhook deliveries are at-least-once and possibly out of order, so every
//! transition here checks current state first and re-application is a no-op.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{
    CreateSessionRequest, GatewayError, GatewayEvent, PaymentGateway,
};
use crate::models::{
    CouponRejection, PaymentStatus, Registration, RegistrationStatus, ReservationStatus,
};
use crate::notify::ConfirmationDispatcher;
use crate::repository::{
    CouponRepository, EventRepository, NewRegistration, RegistrationRepository,
    ReservationRepository, StoreError,
};
use crate::services::ledger::{CouponLedger, LedgerError, PricingPreview};
use crate::services::reservations::ReservationManager;
use crate::services::Clock;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("registrations are closed for this event")]
    RegistrationsClosed,

    #[error("event is sold out")]
    SoldOut,

    #[error("a confirmed registration already exists for this email")]
    DuplicateEmail,

    #[error(transparent)]
    Coupon(#[from] CouponRejection),

    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("registration is {0} and cannot be completed")]
    NotCompletable(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for CheckoutError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Rejected(rejection) => CheckoutError::Coupon(rejection),
            LedgerError::Store(store) => CheckoutError::Store(store),
        }
    }
}

/// Input for `POST /checkout/initiate`.
#[derive(Debug, Clone)]
pub struct InitiateCheckout {
    pub email: String,
    pub full_name: String,
    pub coupon_code: Option<String>,
}

/// Result of initiation. A rejected coupon does not fail initiation; the
/// rejection travels along so the UI can explain the full-price fallback.
#[derive(Debug)]
pub struct InitiateOutcome {
    pub registration: Registration,
    pub pricing: PricingPreview,
    pub coupon_rejection: Option<CouponRejection>,
}

#[derive(Debug)]
pub enum CompleteOutcome {
    Confirmed(Registration),
    RedirectToPayment {
        registration: Registration,
        url: String,
    },
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Applied {
        registration: Registration,
        confirmed_now: bool,
    },
    /// Event re-delivered or irrelevant in the current state.
    NoOp,
}

#[derive(Clone)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub cancel_url: String,
}

pub struct CheckoutService<E, C, R, G> {
    events: E,
    ledger: CouponLedger<C>,
    reservations: ReservationManager<R>,
    registrations: G,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: ConfirmationDispatcher,
    clock: Arc<dyn Clock>,
    config: CheckoutConfig,
}

fn status_label(status: RegistrationStatus) -> &'static str {
    match status {
        RegistrationStatus::Draft => "draft",
        RegistrationStatus::PendingPayment => "pending_payment",
        RegistrationStatus::PaymentProcessing => "payment_processing",
        RegistrationStatus::Confirmed => "confirmed",
        RegistrationStatus::Abandoned => "abandoned",
        RegistrationStatus::PaymentFailed => "payment_failed",
    }
}

impl<E, C, R, G> CheckoutService<E, C, R, G>
where
    E: EventRepository,
    C: CouponRepository,
    R: ReservationRepository,
    G: RegistrationRepository,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: E,
        ledger: CouponLedger<C>,
        reservations: ReservationManager<R>,
        registrations: G,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: ConfirmationDispatcher,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            events,
            ledger,
            reservations,
            registrations,
            gateway,
            dispatcher,
            clock,
            config,
        }
    }

    /// `POST /checkout/validate`: pricing preview, no mutation, coupon
    /// rejections surfaced as errors here (unlike during initiation).
    pub async fn validate_coupon(
        &self,
        event_slug: &str,
        code: &str,
    ) -> Result<PricingPreview, CheckoutError> {
        let event = self.events.find_by_slug(event_slug).await?;
        Ok(self.ledger.preview(&event, code).await?)
    }

    /// Creates a draft registration, or re-initiates a retryable one in
    /// place. Applies the coupon and places the soft hold when the code
    /// validates; degrades to full price when it does not.
    pub async fn initiate(
        &self,
        event_slug: &str,
        input: InitiateCheckout,
    ) -> Result<InitiateOutcome, CheckoutError> {
        let event = self.events.find_by_slug(event_slug).await?;
        let now = self.clock.now();

        if !event.is_registration_open(now) {
            return Err(CheckoutError::RegistrationsClosed);
        }
        let confirmed = self.registrations.confirmed_count(event.id).await?;
        if event.is_sold_out(confirmed) {
            return Err(CheckoutError::SoldOut);
        }

        let existing = self
            .registrations
            .find_for_event_email(event.id, &input.email)
            .await?;
        if let Some(previous) = &existing {
            if !previous.can_be_retried() {
                return Err(CheckoutError::DuplicateEmail);
            }
            // Re-initiation updates the row in place; the stale hold goes
            // back to the pool before the coupon is re-checked.
            self.reservations
                .release_for_registration(previous.id)
                .await?;
        }

        let (coupon, coupon_rejection) = match &input.coupon_code {
            Some(code) => match self.ledger.validate(&event, code).await {
                Ok(coupon) => (Some(coupon), None),
                Err(LedgerError::Rejected(rejection)) => {
                    info!(
                        code = %code,
                        reason = rejection.reason(),
                        "coupon rejected during initiation; proceeding at full price"
                    );
                    (None, Some(rejection))
                }
                Err(LedgerError::Store(e)) => return Err(e.into()),
            },
            None => (None, None),
        };

        let pricing = match &coupon {
            Some(coupon) => PricingPreview::with_coupon(event.ticket_price, coupon),
            None => PricingPreview::without_coupon(event.ticket_price),
        };

        let registration = match existing {
            Some(mut previous) => {
                previous.email = input.email;
                previous.full_name = input.full_name;
                previous.coupon_code = pricing.coupon_code.clone();
                previous.ticket_price = pricing.ticket_price;
                previous.discount_amount = pricing.discount_amount;
                previous.expected_amount = pricing.final_price;
                previous.paid_amount = Decimal::ZERO;
                previous.payment_status = PaymentStatus::Pending;
                previous.status = RegistrationStatus::Draft;
                previous.checkout_session_id = None;
                previous.payment_intent_id = None;
                previous.confirmed_at = None;
                self.registrations.update(&previous, now).await?;
                previous
            }
            None => {
                self.registrations
                    .create(
                        NewRegistration {
                            event_id: event.id,
                            email: input.email,
                            full_name: input.full_name,
                            coupon_code: pricing.coupon_code.clone(),
                            ticket_price: pricing.ticket_price,
                            discount_amount: pricing.discount_amount,
                            expected_amount: pricing.final_price,
                        },
                        now,
                    )
                    .await?
            }
        };

        if let Some(coupon) = &coupon {
            match self
                .reservations
                .create_reservation(coupon, registration.id)
                .await
            {
                Ok(_) => {}
                // Lost the hold between validate and reserve: fall back to
                // full price rather than failing the whole initiation.
                Err(StoreError::UsageLimitReached) => {
                    let mut registration = registration;
                    registration.coupon_code = None;
                    registration.discount_amount = Decimal::ZERO;
                    registration.expected_amount = registration.ticket_price;
                    self.registrations.update(&registration, now).await?;
                    return Ok(InitiateOutcome {
                        pricing: PricingPreview::without_coupon(registration.ticket_price),
                        registration,
                        coupon_rejection: Some(CouponRejection::UsageLimitReached),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(InitiateOutcome {
            registration,
            pricing,
            coupon_rejection,
        })
    }

    /// `POST /checkout/complete`: a free registration confirms on the spot;
    /// a paid one moves to pending_payment behind a gateway session. The
    /// registration must belong to the event named in the URL.
    pub async fn complete(
        &self,
        event_slug: &str,
        registration_id: Uuid,
    ) -> Result<CompleteOutcome, CheckoutError> {
        let event = self.events.find_by_slug(event_slug).await?;
        let registration = self.registrations.find(registration_id).await?;
        if registration.event_id != event.id {
            return Err(StoreError::NotFound("registration").into());
        }

        match registration.status {
            RegistrationStatus::Draft => {}
            // Re-submitted completion of an already confirmed registration.
            RegistrationStatus::Confirmed => {
                return Ok(CompleteOutcome::Confirmed(registration))
            }
            other => return Err(CheckoutError::NotCompletable(status_label(other))),
        }

        if registration.is_free() {
            let registration = self
                .finalize_confirmation(registration, Decimal::ZERO)
                .await?;
            return Ok(CompleteOutcome::Confirmed(registration));
        }

        let session = self
            .gateway
            .create_session(CreateSessionRequest {
                registration_id: registration.id,
                event_slug: event.slug,
                customer_email: registration.email.clone(),
                amount: registration.expected_amount,
                currency: event.currency,
                success_url: self.config.success_url.clone(),
                cancel_url: self.config.cancel_url.clone(),
            })
            .await?;

        let mut registration = registration;
        registration.checkout_session_id = Some(session.id);
        registration.status = RegistrationStatus::PendingPayment;
        self.registrations
            .update(&registration, self.clock.now())
            .await?;

        Ok(CompleteOutcome::RedirectToPayment {
            registration,
            url: session.url,
        })
    }

    /// Applies one verified gateway event. Idempotent under re-delivery and
    /// tolerant of out-of-order arrival.
    pub async fn apply_gateway_event(
        &self,
        event: GatewayEvent,
    ) -> Result<WebhookOutcome, CheckoutError> {
        let registration = self
            .registrations
            .find(event.registration_id())
            .await?;

        match event {
            GatewayEvent::CheckoutCompleted {
                session_id,
                payment_intent_id,
                ..
            } => {
                if registration.status != RegistrationStatus::PendingPayment {
                    return Ok(WebhookOutcome::NoOp);
                }
                let mut registration = registration;
                if session_id.is_some() {
                    registration.checkout_session_id = session_id;
                }
                registration.payment_intent_id = payment_intent_id;
                registration.status = RegistrationStatus::PaymentProcessing;
                self.registrations
                    .update(&registration, self.clock.now())
                    .await?;
                Ok(WebhookOutcome::Applied {
                    registration,
                    confirmed_now: false,
                })
            }

            GatewayEvent::CheckoutExpired { .. } => {
                if !matches!(
                    registration.status,
                    RegistrationStatus::PendingPayment | RegistrationStatus::PaymentProcessing
                ) {
                    return Ok(WebhookOutcome::NoOp);
                }
                self.reservations
                    .release_for_registration(registration.id)
                    .await?;
                let mut registration = registration;
                registration.status = RegistrationStatus::Abandoned;
                self.registrations
                    .update(&registration, self.clock.now())
                    .await?;
                Ok(WebhookOutcome::Applied {
                    registration,
                    confirmed_now: false,
                })
            }

            GatewayEvent::PaymentSucceeded { amount, .. } => {
                if registration.status == RegistrationStatus::Confirmed {
                    // At-least-once delivery: already applied.
                    return Ok(WebhookOutcome::NoOp);
                }
                match self.finalize_confirmation(registration, amount).await {
                    Ok(registration) => Ok(WebhookOutcome::Applied {
                        registration,
                        confirmed_now: true,
                    }),
                    // The hold lost the last-use race after payment landed.
                    // Record the capture, park the registration as failed,
                    // and ack the webhook — retrying cannot win the race.
                    Err(CheckoutError::Coupon(CouponRejection::UsageLimitReached)) => {
                        let mut registration =
                            self.registrations.find(event.registration_id()).await?;
                        registration.mark_as_paid(amount);
                        registration.status = RegistrationStatus::PaymentFailed;
                        self.registrations
                            .update(&registration, self.clock.now())
                            .await?;
                        Ok(WebhookOutcome::Applied {
                            registration,
                            confirmed_now: false,
                        })
                    }
                    Err(e) => Err(e),
                }
            }

            GatewayEvent::PaymentFailed { .. } => {
                if matches!(
                    registration.status,
                    RegistrationStatus::Confirmed | RegistrationStatus::PaymentFailed
                ) {
                    return Ok(WebhookOutcome::NoOp);
                }
                self.reservations
                    .release_for_registration(registration.id)
                    .await?;
                let mut registration = registration;
                registration.payment_status = PaymentStatus::Failed;
                registration.status = RegistrationStatus::PaymentFailed;
                self.registrations
                    .update(&registration, self.clock.now())
                    .await?;
                Ok(WebhookOutcome::Applied {
                    registration,
                    confirmed_now: false,
                })
            }

            GatewayEvent::PartiallyFunded { amount, .. } => {
                if registration.status == RegistrationStatus::Confirmed {
                    return Ok(WebhookOutcome::NoOp);
                }
                let mut registration = registration;
                registration.mark_as_paid(amount);
                self.registrations
                    .update(&registration, self.clock.now())
                    .await?;
                Ok(WebhookOutcome::Applied {
                    registration,
                    confirmed_now: false,
                })
            }
        }
    }

    /// Shared confirmation tail: confirm the hold (the step that can lose
    /// the usage-limit race), then record payment and flip to confirmed,
    /// then fire the one-shot completion side effects.
    async fn finalize_confirmation(
        &self,
        mut registration: Registration,
        amount: Decimal,
    ) -> Result<Registration, CheckoutError> {
        if let Some(reservation) = self
            .reservations
            .find_for_registration(registration.id)
            .await?
        {
            match reservation.status {
                ReservationStatus::Reserved | ReservationStatus::Expired => {
                    match self.reservations.confirm(reservation.id).await {
                        Ok(_) => {}
                        Err(StoreError::UsageLimitReached) => {
                            return Err(CouponRejection::UsageLimitReached.into());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                ReservationStatus::Confirmed => {}
                ReservationStatus::Released => {
                    // Hold was given up earlier but the discount stayed on
                    // the row; honor the price the attendee saw.
                    warn!(
                        registration_id = %registration.id,
                        reservation_id = %reservation.id,
                        "confirming registration whose hold was already released"
                    );
                }
            }
        }

        let now = self.clock.now();
        registration.mark_as_paid(amount);
        registration.status = RegistrationStatus::Confirmed;
        registration.confirmed_at = Some(now);
        self.registrations.update(&registration, now).await?;

        info!(
            registration_id = %registration.id,
            event_id = %registration.event_id,
            paid = %registration.paid_amount,
            "registration confirmed"
        );
        self.dispatcher.registration_completed(&registration).await;
        Ok(registration)
    }
}
