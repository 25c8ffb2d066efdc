//! Side effects of a confirmation.
//!
//! The state machine reports "confirmed just now" in its return value; the
//! dispatcher runs once per such transition, after the local transaction has
//! committed. Neither the mail trigger nor the CRM sync can fail a
//! confirmation — failures are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::crm::CrmSync;
use crate::models::Registration;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation(&self, registration: &Registration) -> Result<(), String>;
}

/// Hands the trigger to the surrounding application's template mailer;
/// this core only owns the trigger point.
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send_confirmation(&self, registration: &Registration) -> Result<(), String> {
        info!(
            registration_id = %registration.id,
            email = %registration.email,
            "confirmation email queued"
        );
        Ok(())
    }
}

pub struct ConfirmationDispatcher {
    mailer: Arc<dyn Mailer>,
    crm: Arc<dyn CrmSync>,
    crm_list_id: String,
}

impl ConfirmationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, crm: Arc<dyn CrmSync>, crm_list_id: String) -> Self {
        Self {
            mailer,
            crm,
            crm_list_id,
        }
    }

    /// Fired once per registration confirmation.
    pub async fn registration_completed(&self, registration: &Registration) {
        if let Err(e) = self.mailer.send_confirmation(registration).await {
            warn!(
                registration_id = %registration.id,
                error = %e,
                "confirmation email dispatch failed"
            );
        }

        let mut properties = HashMap::new();
        properties.insert("full_name".to_string(), registration.full_name.clone());
        properties.insert(
            "registration_id".to_string(),
            registration.id.to_string(),
        );
        if let Err(e) = self
            .crm
            .add_contact_to_list(&registration.email, &self.crm_list_id, properties)
            .await
        {
            warn!(
                registration_id = %registration.id,
                error = %e,
                "crm sync failed; continuing without it"
            );
        }
    }
}
