//! HTTP client for the billing provider's REST API.
//!
//! Authenticates with a bearer secret key. Subscription objects are decoded
//! straight into [`ProviderSubscription`]; any non-success status becomes a
//! [`BillingError::Rejected`] carrying the provider's error message.

use std::time::Duration;

use serde::Deserialize;
use tessera_core::billing::{BillingProvider, ProviderSubscription};
use tessera_core::error::BillingError;
use zeroize::Zeroizing;

use crate::config::BillingApiConfig;

/// Billing provider client over HTTPS.
pub struct HttpBillingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Zeroizing<String>,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Deserialize)]
struct ProviderErrorDetail {
    message: Option<String>,
}

impl HttpBillingProvider {
    /// Build a client from configuration.
    ///
    /// The client-level timeout is a backstop; callers still bound each call.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &BillingApiConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout + Duration::from_secs(1))
            .build()
            .map_err(|e| BillingError::Transport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }

    fn subscription_url(&self, external_id: &str) -> String {
        format!("{}/v1/subscriptions/{external_id}", self.base_url)
    }

    async fn decode(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<ProviderSubscription, BillingError> {
        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<ProviderErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_owned());
            return Err(BillingError::Rejected {
                operation,
                status: status.as_u16(),
                reason,
            });
        }

        response
            .json::<ProviderSubscription>()
            .await
            .map_err(|e| BillingError::InvalidResponse {
                reason: format!("{operation}: {e}"),
            })
    }
}

fn transport(e: &reqwest::Error) -> BillingError {
    BillingError::Transport {
        reason: e.to_string(),
    }
}

#[async_trait::async_trait]
impl BillingProvider for HttpBillingProvider {
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProviderSubscription, BillingError> {
        let response = self
            .client
            .get(self.subscription_url(external_id))
            .bearer_auth(self.api_key.as_str())
            .send()
            .await
            .map_err(|e| transport(&e))?;
        Self::decode("fetch_subscription", response).await
    }

    async fn cancel_at_period_end(&self, external_id: &str) -> Result<ProviderSubscription, BillingError> {
        let response = self
            .client
            .post(self.subscription_url(external_id))
            .bearer_auth(self.api_key.as_str())
            .form(&[("cancel_at_period_end", "true")])
            .send()
            .await
            .map_err(|e| transport(&e))?;
        Self::decode("cancel_at_period_end", response).await
    }
}

impl std::fmt::Debug for HttpBillingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBillingProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
