//! Mock gateway for development and the service test suites.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::gateway::{CheckoutSession, CreateSessionRequest, GatewayError, PaymentGateway};

/// Records every session request and hands back deterministic sessions.
/// Can be switched into a failing mode to exercise the fatal
/// session-creation path.
#[derive(Clone, Default)]
pub struct MockGateway {
    requests: Arc<Mutex<Vec<CreateSessionRequest>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_requests(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn requests(&self) -> Vec<CreateSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if *self.fail.lock().unwrap() {
            return Err(GatewayError::Request("mock gateway set to fail".into()));
        }
        let session = CheckoutSession {
            id: format!("cs_mock_{}", request.registration_id.simple()),
            url: format!(
                "https://checkout.example.test/pay/{}",
                request.registration_id
            ),
        };
        self.requests.lock().unwrap().push(request);
        Ok(session)
    }
}
