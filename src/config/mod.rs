use std::env;

pub mod cors;

pub use cors::create_cors_layer;

/// All runtime configuration, read once at startup and passed down
/// explicitly.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Secret for verifying payment webhook signatures.
    pub webhook_secret: String,
    /// Secret key for creating gateway checkout sessions.
    pub gateway_secret_key: String,
    /// CRM access token; CRM sync is skipped when unset.
    pub crm_access_token: Option<String>,
    pub crm_list_id: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub reservation_ttl_minutes: i64,
    pub draft_ttl_hours: i64,
    pub reaper_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/tessera".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3001),
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            gateway_secret_key: env::var("PAYMENT_SECRET_KEY").unwrap_or_default(),
            crm_access_token: env::var("CRM_ACCESS_TOKEN").ok(),
            crm_list_id: env::var("CRM_LIST_ID").unwrap_or_else(|_| "registrations".to_string()),
            checkout_success_url: env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout/success".to_string()),
            checkout_cancel_url: env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout/cancelled".to_string()),
            reservation_ttl_minutes: env::var("RESERVATION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::services::reservations::DEFAULT_RESERVATION_TTL_MINUTES),
            draft_ttl_hours: env::var("DRAFT_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::services::reaper::DEFAULT_DRAFT_TTL_HOURS),
            reaper_interval_secs: env::var("REAPER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}
