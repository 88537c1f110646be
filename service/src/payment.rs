//! HTTP client for the payment provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use tally_engine::{CreatePaymentReply, CreatePaymentRequest, EngineError, PaymentClient};

/// Error envelope the provider returns on failure.
#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
}

/// Payment provider client over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpPaymentClient {
    client: Client,
    base_url: String,
}

impl HttpPaymentClient {
    /// Create a client against the provider's base URL.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PaymentServiceUnavailable`] if the HTTP client
    /// cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| EngineError::PaymentServiceUnavailable)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentClient for HttpPaymentClient {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentReply, EngineError> {
        let url = format!("{}/v1/payments", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::PaymentCreateFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ProviderError>()
                .await
                .map(|e| e.message)
                .unwrap_or_default();
            return Err(EngineError::PaymentCreateFailed(format!(
                "provider returned {status}: {message}"
            )));
        }

        response
            .json::<CreatePaymentReply>()
            .await
            .map_err(|e| EngineError::PaymentCreateFailed(e.to_string()))
    }
}
