//! Webhook event schema.
//!
//! Only the fields the processor acts on are modeled. Unknown fields are
//! ignored so provider API additions do not break parsing; missing required
//! fields make the event malformed.

use serde::Deserialize;

use crate::billing::ProviderSubscription;
use crate::error::WebhookError;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const CUSTOMER_CREATED: &str = "customer.created";

/// The outer event wrapper every delivery shares.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the provider generated the event.
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// A completed checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub mode: String,
    pub payment_status: String,
    pub status: Option<String>,
    pub subscription: Option<String>,
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
}

impl CheckoutSession {
    /// Whether this checkout started a paid subscription.
    ///
    /// Other checkouts (one-off payments, unpaid or still-open sessions)
    /// carry nothing to synchronize.
    #[must_use]
    pub fn is_paid_subscription(&self) -> bool {
        self.mode == "subscription"
            && self.payment_status == "paid"
            && self.status.as_deref() == Some("complete")
    }
}

/// A decoded, type-specific event.
#[derive(Debug, Clone)]
pub enum Event {
    CheckoutCompleted(CheckoutSession),
    SubscriptionUpdated(ProviderSubscription),
    SubscriptionDeleted(ProviderSubscription),
    CustomerCreated { customer_id: Option<String> },
    Unhandled,
}

impl Envelope {
    /// Parse the outer envelope from a raw body.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Malformed`] if the body is not a valid envelope.
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::Malformed {
            reason: format!("invalid event envelope: {e}"),
        })
    }

    /// Decode `data.object` according to the event type.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Malformed`] if a handled type's object does
    /// not match its schema.
    pub fn decode(&self) -> Result<Event, WebhookError> {
        match self.event_type.as_str() {
            CHECKOUT_COMPLETED => self.object().map(Event::CheckoutCompleted),
            SUBSCRIPTION_UPDATED => self.object().map(Event::SubscriptionUpdated),
            SUBSCRIPTION_DELETED => self.object().map(Event::SubscriptionDeleted),
            CUSTOMER_CREATED => Ok(Event::CustomerCreated {
                customer_id: self
                    .data
                    .object
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned),
            }),
            _ => Ok(Event::Unhandled),
        }
    }

    fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, WebhookError> {
        T::deserialize(&self.data.object).map_err(|e| WebhookError::Malformed {
            reason: format!("invalid {} object: {e}", self.event_type),
        })
    }
}
