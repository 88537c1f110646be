//! The tally HTTP client implementation.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    AccountResponse, ApiErrorResponse, CheckQuotaResponse, DeductQuotaResponse,
    ListRecordsResponse, RechargeCallbackResponse, RechargeRequest, RechargeResponse,
    StatsResponse, StatsSummaryResponse,
};

/// Options for building a [`TallyClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 10).
    pub timeout_seconds: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

/// tally API client.
#[derive(Debug, Clone)]
pub struct TallyClient {
    client: Client,
    base_url: String,
}

impl TallyClient {
    /// Create a client with default options.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (does not happen with
    /// default settings).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_options(base_url, &ClientOptions::default())
    }

    /// Create a client with custom options.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    #[must_use]
    pub fn with_options(base_url: impl Into<String>, options: &ClientOptions) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Balance and current quotas for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn get_account(&self, user_id: &str) -> Result<AccountResponse, ClientError> {
        let url = format!("{}/v1/account/{user_id}", self.base_url);
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    /// Create a recharge order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn recharge(
        &self,
        request: &RechargeRequest,
    ) -> Result<RechargeResponse, ClientError> {
        let url = format!("{}/v1/recharge", self.base_url);
        let response = self.client.post(url).json(request).send().await?;
        Self::decode(response).await
    }

    /// A user's deduction history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn list_records(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<ListRecordsResponse, ClientError> {
        let url = format!(
            "{}/v1/records/{user_id}?page={page}&page_size={page_size}",
            self.base_url
        );
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    /// Today's usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn stats_today(
        &self,
        user_id: &str,
        service_name: Option<&str>,
    ) -> Result<StatsResponse, ClientError> {
        self.stats("today", user_id, service_name).await
    }

    /// This month's usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn stats_month(
        &self,
        user_id: &str,
        service_name: Option<&str>,
    ) -> Result<StatsResponse, ClientError> {
        self.stats("month", user_id, service_name).await
    }

    async fn stats(
        &self,
        period: &str,
        user_id: &str,
        service_name: Option<&str>,
    ) -> Result<StatsResponse, ClientError> {
        let mut url = format!("{}/v1/stats/{period}/{user_id}", self.base_url);
        if let Some(service) = service_name {
            url.push_str("?service_name=");
            url.push_str(service);
        }
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    /// Current-month summary across services.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn stats_summary(
        &self,
        user_id: &str,
    ) -> Result<StatsSummaryResponse, ClientError> {
        let url = format!("{}/v1/stats/summary/{user_id}", self.base_url);
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    /// May this user perform `count` units of `service`?
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn check_quota(
        &self,
        user_id: &str,
        service_name: &str,
        count: i64,
    ) -> Result<CheckQuotaResponse, ClientError> {
        let url = format!("{}/internal/v1/quota/check", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "user_id": user_id,
                "service_name": service_name,
                "count": count
            }))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Commit a deduction.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one;
    /// [`ClientError::is_insufficient_balance`] identifies the terminal
    /// out-of-funds case.
    pub async fn deduct_quota(
        &self,
        user_id: &str,
        service_name: &str,
        count: i64,
    ) -> Result<DeductQuotaResponse, ClientError> {
        let url = format!("{}/internal/v1/quota/deduct", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "user_id": user_id,
                "service_name": service_name,
                "count": count
            }))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Relay a payment provider callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service reports one.
    pub async fn recharge_callback(
        &self,
        order_id: &str,
        payment_id: &str,
        amount_cents: i64,
        status: &str,
    ) -> Result<RechargeCallbackResponse, ClientError> {
        let url = format!("{}/internal/v1/recharge/callback", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "order_id": order_id,
                "payment_id": payment_id,
                "amount_cents": amount_cents,
                "status": status
            }))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Decode a success body or surface the service's error envelope.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()));
        }

        let envelope = response
            .json::<ApiErrorResponse>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Err(ClientError::Api {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
        })
    }
}
