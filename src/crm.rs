//! CRM sync adapter (HubSpot-shaped). Strictly fire-and-forget: a failed
//! sync is logged and swallowed, never allowed to undo a confirmation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait CrmSync: Send + Sync {
    async fn add_contact_to_list(
        &self,
        email: &str,
        list_id: &str,
        properties: HashMap<String, String>,
    ) -> Result<(), CrmError>;
}

const DEFAULT_API_BASE: &str = "https://api.hubapi.com";

pub struct HubSpotCrm {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl HubSpotCrm {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            access_token: access_token.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl CrmSync for HubSpotCrm {
    async fn add_contact_to_list(
        &self,
        email: &str,
        list_id: &str,
        properties: HashMap<String, String>,
    ) -> Result<(), CrmError> {
        let body = serde_json::json!({
            "email": email,
            "listId": list_id,
            "properties": properties,
        });
        let response = self
            .client
            .post(format!("{}/contacts/v1/contact/createOrUpdate", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CrmError::Request(format!(
                "crm returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Stand-in when no CRM credentials are configured.
pub struct DisabledCrm;

#[async_trait]
impl CrmSync for DisabledCrm {
    async fn add_contact_to_list(
        &self,
        email: &str,
        _list_id: &str,
        _properties: HashMap<String, String>,
    ) -> Result<(), CrmError> {
        tracing::debug!(%email, "crm sync disabled, skipping");
        Ok(())
    }
}

/// Test double recording every sync call.
#[derive(Clone, Default)]
pub struct RecordingCrm {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(email, list_id)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrmSync for RecordingCrm {
    async fn add_contact_to_list(
        &self,
        email: &str,
        list_id: &str,
        _properties: HashMap<String, String>,
    ) -> Result<(), CrmError> {
        self.calls
            .lock()
            .unwrap()
            .push((email.to_string(), list_id.to_string()));
        Ok(())
    }
}
