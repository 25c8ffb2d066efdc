use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chrono::Duration;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use tessera_server::config::Config;
use tessera_server::crm::{CrmSync, DisabledCrm, HubSpotCrm};
use tessera_server::gateway::{PaymentGateway, StripeGateway, WebhookVerifier};
use tessera_server::notify::{ConfirmationDispatcher, LoggingMailer};
use tessera_server::repository::postgres::{
    PgCouponRepository, PgEventRepository, PgRegistrationRepository, PgReservationRepository,
};
use tessera_server::routes::create_routes;
use tessera_server::services::{
    CheckoutConfig, CheckoutService, Clock, CouponLedger, Reaper, ReservationManager, SystemClock,
};
use tessera_server::state::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let events = PgEventRepository::new(pool.clone());
    let coupons = PgCouponRepository::new(pool.clone());
    let reservations = PgReservationRepository::new(pool.clone());
    let registrations = PgRegistrationRepository::new(pool.clone());

    let ledger = CouponLedger::new(coupons.clone(), clock.clone());
    let manager = ReservationManager::new(
        reservations.clone(),
        clock.clone(),
        Duration::minutes(config.reservation_ttl_minutes),
    );

    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(StripeGateway::new(config.gateway_secret_key.clone()));
    let crm: Arc<dyn CrmSync> = match &config.crm_access_token {
        Some(token) => Arc::new(HubSpotCrm::new(token.clone())),
        None => Arc::new(DisabledCrm),
    };
    let dispatcher =
        ConfirmationDispatcher::new(Arc::new(LoggingMailer), crm, config.crm_list_id.clone());

    let checkout = Arc::new(CheckoutService::new(
        events,
        ledger,
        manager,
        registrations.clone(),
        gateway,
        dispatcher,
        clock.clone(),
        CheckoutConfig {
            success_url: config.checkout_success_url.clone(),
            cancel_url: config.checkout_cancel_url.clone(),
        },
    ));

    let reaper = Arc::new(Reaper::new(
        coupons,
        reservations,
        registrations,
        clock.clone(),
        Duration::hours(config.draft_ttl_hours),
    ));

    let sweep_interval = config.reaper_interval_secs;
    tokio::spawn({
        let reaper = reaper.clone();
        async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
            loop {
                ticker.tick().await;
                reaper.run().await;
            }
        }
    });
    tokio::spawn({
        let reaper = reaper.clone();
        async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(86_400));
            loop {
                ticker.tick().await;
                reaper.run_year_rollover().await;
            }
        }
    });

    let state = AppState {
        checkout,
        webhook_verifier: WebhookVerifier::new(config.webhook_secret.clone()),
        clock,
    };

    let app: Router = create_routes(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
