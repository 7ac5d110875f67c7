//! Billing-provider abstraction.
//!
//! The provider is the system of record for subscription status. Webhook
//! bodies are not trusted as the sole source of truth for a new
//! subscription: the canonical object is fetched through
//! [`BillingProvider::fetch_subscription`]. Every call goes through
//! [`bounded`] so a slow provider can never hold a request open
//! indefinitely.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tessera_storage::{SubscriptionSnapshot, SubscriptionStatus};

use crate::error::BillingError;

/// The provider's authoritative subscription record.
///
/// Field names follow the provider's JSON so the same type deserializes
/// both API responses and webhook `data.object` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: ProviderStatus,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Unix seconds.
    pub current_period_start: i64,
    /// Unix seconds.
    pub current_period_end: i64,
    #[serde(default)]
    pub items: Option<ItemList>,
}

/// A subscription status as sent by the provider.
///
/// Statuses added by the provider after this build still decode, so the
/// event can be retried once support lands instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProviderStatus {
    Known(SubscriptionStatus),
    Unrecognized(String),
}

impl From<SubscriptionStatus> for ProviderStatus {
    fn from(status: SubscriptionStatus) -> Self {
        Self::Known(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Price {
    pub id: String,
}

impl ProviderSubscription {
    /// Price of the first subscription item, if any.
    #[must_use]
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .as_ref()
            .and_then(|items| items.data.first())
            .map(|item| item.price.id.as_str())
    }

    /// Convert into the snapshot written to the datastore.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidResponse`] if the period bounds are not
    /// representable timestamps or are inverted, and
    /// [`BillingError::UnrecognizedStatus`] if the status is unknown.
    pub fn to_snapshot(&self, observed_at: DateTime<Utc>) -> Result<SubscriptionSnapshot, BillingError> {
        let status = match &self.status {
            ProviderStatus::Known(status) => *status,
            ProviderStatus::Unrecognized(raw) => {
                return Err(BillingError::UnrecognizedStatus {
                    subscription: self.id.clone(),
                    status: raw.clone(),
                });
            }
        };
        let start = unix_to_utc(self.current_period_start)?;
        let end = unix_to_utc(self.current_period_end)?;
        if end < start {
            return Err(BillingError::InvalidResponse {
                reason: format!("subscription {} period ends before it starts", self.id),
            });
        }

        Ok(SubscriptionSnapshot {
            external_subscription_id: self.id.clone(),
            external_customer_id: self.customer.clone(),
            external_price_id: self.price_id().map(str::to_owned),
            status,
            current_period_start: start,
            current_period_end: end,
            cancel_at_period_end: self.cancel_at_period_end,
            observed_at,
        })
    }
}

/// Convert Unix seconds to a UTC timestamp.
///
/// # Errors
///
/// Returns [`BillingError::InvalidResponse`] if `secs` is out of range.
pub fn unix_to_utc(secs: i64) -> Result<DateTime<Utc>, BillingError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| BillingError::InvalidResponse {
            reason: format!("timestamp {secs} out of range"),
        })
}

/// The billing provider's API, as used by this crate.
#[async_trait::async_trait]
pub trait BillingProvider: Send + Sync + 'static {
    /// Fetch the canonical subscription object.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError`] on transport, status, or decoding failure.
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProviderSubscription, BillingError>;

    /// Ask the provider to cancel the subscription at the end of its
    /// current period.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError`] on transport, status, or decoding failure.
    async fn cancel_at_period_end(&self, external_id: &str) -> Result<ProviderSubscription, BillingError>;
}

/// Run a provider call with an upper bound on its duration.
///
/// # Errors
///
/// Returns [`BillingError::Timeout`] if `limit` elapses first, otherwise
/// whatever the call returns.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, BillingError>
where
    F: Future<Output = Result<T, BillingError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BillingError::Timeout {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}
