//! Billing webhook processing.
//!
//! A delivery goes through three steps, and stops at the first failure:
//!
//! 1. Signature verification over the raw body.
//! 2. Envelope and per-type schema validation.
//! 3. Dispatch by event type, writing through the subscription store.
//!
//! Every write is an upsert keyed by the external subscription id and
//! guarded by the provider event time, so redeliveries in any order
//! converge on the same row. The outcome tells the HTTP layer whether the
//! provider should retry: only [`WebhookError::Transient`] is retryable.
//! Unknown tenants, unknown customers, and unhandled event types are
//! acknowledged so they never cause a retry storm.

pub mod event;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tessera_storage::{
    StoreError, SubscriptionStatus, SubscriptionStore, TenantStore, UpsertOutcome,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::billing::{self, BillingProvider, ProviderSubscription};
use crate::error::{BillingError, WebhookError};
use crate::lifecycle::LifecycleState;

pub use event::{CheckoutSession, Envelope, Event};
pub use signature::{DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER, sign, verify_signature};

/// Settings for [`WebhookProcessor`].
pub struct WebhookSettings {
    /// Shared signing secret.
    pub secret: Zeroizing<Vec<u8>>,
    /// Maximum distance between the signed timestamp and now.
    pub tolerance_secs: i64,
    /// Upper bound on each billing-provider call.
    pub provider_timeout: Duration,
}

impl WebhookSettings {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            provider_timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("secret", &"[redacted]")
            .field("tolerance_secs", &self.tolerance_secs)
            .field("provider_timeout", &self.provider_timeout)
            .finish()
    }
}

/// A successfully handled delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    /// A subscription row was written or found to be newer already.
    Applied {
        event_id: String,
        outcome: UpsertOutcome,
    },
    /// Nothing to do; acknowledged without touching any data.
    Ignored {
        event_id: String,
        reason: &'static str,
    },
}

impl WebhookAck {
    fn ignored(event_id: &str, reason: &'static str) -> Self {
        Self::Ignored {
            event_id: event_id.to_owned(),
            reason,
        }
    }
}

/// Verifies and applies billing-provider events.
pub struct WebhookProcessor {
    tenants: Arc<dyn TenantStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    provider: Arc<dyn BillingProvider>,
    settings: WebhookSettings,
}

impl WebhookProcessor {
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn BillingProvider>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            tenants,
            subscriptions,
            provider,
            settings,
        }
    }

    /// Process one delivery at the current time.
    ///
    /// # Errors
    ///
    /// See [`WebhookProcessor::process_at`].
    pub async fn process(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookAck, WebhookError> {
        self.process_at(payload, signature, Utc::now()).await
    }

    /// Process one delivery as if received at `now`.
    ///
    /// # Errors
    ///
    /// - [`WebhookError::Signature`] if the delivery is not authentic. Nothing is read or written.
    /// - [`WebhookError::Malformed`] if the event does not match its schema.
    /// - [`WebhookError::Transient`] if the datastore or provider failed. Nothing was applied.
    pub async fn process_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookAck, WebhookError> {
        if let Err(e) = verify_signature(
            payload,
            signature,
            &self.settings.secret,
            self.settings.tolerance_secs,
            now,
        ) {
            warn!(error = %e, "rejected webhook with invalid signature");
            return Err(e.into());
        }

        let envelope = Envelope::parse(payload).inspect_err(|e| {
            warn!(error = %e, "rejected malformed webhook envelope");
        })?;
        let event = envelope.decode().inspect_err(|e| {
            warn!(event_id = %envelope.id, event_type = %envelope.event_type, error = %e, "rejected malformed webhook event");
        })?;
        let observed_at = billing::unix_to_utc(envelope.created).map_err(|e| WebhookError::Malformed {
            reason: e.to_string(),
        })?;

        debug!(event_id = %envelope.id, event_type = %envelope.event_type, "processing webhook");

        let result = match event {
            Event::CheckoutCompleted(session) => {
                self.checkout_completed(&envelope.id, &session, observed_at).await
            }
            Event::SubscriptionUpdated(sub) => {
                self.subscription_changed(&envelope.id, sub, observed_at).await
            }
            Event::SubscriptionDeleted(mut sub) => {
                sub.status = SubscriptionStatus::Canceled.into();
                self.subscription_changed(&envelope.id, sub, observed_at).await
            }
            Event::CustomerCreated { customer_id } => {
                info!(event_id = %envelope.id, customer_id = customer_id.as_deref().unwrap_or("-"), "customer created");
                Ok(WebhookAck::ignored(&envelope.id, "customer.created is informational"))
            }
            Event::Unhandled => {
                info!(event_id = %envelope.id, event_type = %envelope.event_type, "unhandled webhook event type");
                Ok(WebhookAck::ignored(&envelope.id, "unhandled event type"))
            }
        };

        if let Err(WebhookError::Transient { reason }) = &result {
            warn!(event_id = %envelope.id, event_type = %envelope.event_type, %reason, "webhook failed transiently; provider will redeliver");
        }
        result
    }

    async fn checkout_completed(
        &self,
        event_id: &str,
        session: &CheckoutSession,
        observed_at: DateTime<Utc>,
    ) -> Result<WebhookAck, WebhookError> {
        if !session.is_paid_subscription() {
            debug!(event_id, session_id = %session.id, mode = %session.mode, "checkout is not a paid subscription");
            return Ok(WebhookAck::ignored(event_id, "checkout is not a paid subscription"));
        }

        let (Some(subscription_id), Some(customer_id), Some(raw_tenant_id)) = (
            session.subscription.as_deref(),
            session.customer.as_deref(),
            session.metadata.tenant_id.as_deref(),
        ) else {
            return Err(WebhookError::Malformed {
                reason: format!(
                    "checkout {} lacks subscription, customer, or tenant metadata",
                    session.id
                ),
            });
        };

        let tenant_id: Uuid = raw_tenant_id.parse().map_err(|_| WebhookError::Malformed {
            reason: format!("checkout {} has invalid tenant id '{raw_tenant_id}'", session.id),
        })?;

        let canonical = billing::bounded(
            "fetch_subscription",
            self.settings.provider_timeout,
            self.provider.fetch_subscription(subscription_id),
        )
        .await
        .map_err(transient)?;

        if canonical.customer != customer_id {
            warn!(
                event_id,
                %tenant_id,
                session_customer = customer_id,
                canonical_customer = %canonical.customer,
                "checkout customer differs from canonical subscription; using canonical"
            );
        }

        let snapshot = canonical.to_snapshot(observed_at).map_err(transient)?;

        match self.subscriptions.record_checkout(tenant_id, &snapshot).await {
            Ok(outcome) => {
                if outcome.subscription == UpsertOutcome::TenantConflict {
                    warn!(
                        event_id,
                        %tenant_id,
                        subscription_id = %snapshot.external_subscription_id,
                        "checkout subscription is owned by another tenant; left untouched"
                    );
                }
                if outcome.customer_id_conflict {
                    warn!(
                        event_id,
                        %tenant_id,
                        customer_id = %snapshot.external_customer_id,
                        "tenant already linked to a different customer; kept existing"
                    );
                }
                info!(
                    event_id,
                    %tenant_id,
                    subscription_id = %snapshot.external_subscription_id,
                    outcome = ?outcome.subscription,
                    state = %LifecycleState::from_parts(snapshot.status, snapshot.cancel_at_period_end),
                    "checkout applied"
                );
                Ok(WebhookAck::Applied {
                    event_id: event_id.to_owned(),
                    outcome: outcome.subscription,
                })
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(event_id, %tenant_id, "checkout references unknown tenant; acknowledged");
                Ok(WebhookAck::ignored(event_id, "unknown tenant"))
            }
            Err(e) => Err(transient(e)),
        }
    }

    async fn subscription_changed(
        &self,
        event_id: &str,
        sub: ProviderSubscription,
        observed_at: DateTime<Utc>,
    ) -> Result<WebhookAck, WebhookError> {
        let Some(tenant) = self
            .tenants
            .tenant_by_customer_id(&sub.customer)
            .await
            .map_err(transient)?
        else {
            warn!(
                event_id,
                customer_id = %sub.customer,
                subscription_id = %sub.id,
                "subscription event for unknown customer; acknowledged without changes"
            );
            return Ok(WebhookAck::ignored(event_id, "unknown customer"));
        };

        let snapshot = sub.to_snapshot(observed_at).map_err(|e| match e {
            BillingError::UnrecognizedStatus { .. } => transient(e),
            other => WebhookError::Malformed {
                reason: other.to_string(),
            },
        })?;

        let outcome = self
            .subscriptions
            .upsert_subscription(tenant.id, &snapshot)
            .await
            .map_err(transient)?;

        match outcome {
            UpsertOutcome::Stale => info!(
                event_id,
                tenant_id = %tenant.id,
                subscription_id = %snapshot.external_subscription_id,
                "skipped event older than stored subscription state"
            ),
            UpsertOutcome::TenantConflict => warn!(
                event_id,
                tenant_id = %tenant.id,
                subscription_id = %snapshot.external_subscription_id,
                "subscription is owned by another tenant; acknowledged without changes"
            ),
            UpsertOutcome::Inserted | UpsertOutcome::Updated => info!(
                event_id,
                tenant_id = %tenant.id,
                subscription_id = %snapshot.external_subscription_id,
                outcome = ?outcome,
                state = %LifecycleState::from_parts(snapshot.status, snapshot.cancel_at_period_end),
                "subscription synchronized"
            ),
        }

        Ok(WebhookAck::Applied {
            event_id: event_id.to_owned(),
            outcome,
        })
    }
}

impl std::fmt::Debug for WebhookProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProcessor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn transient(e: impl std::fmt::Display) -> WebhookError {
    WebhookError::Transient {
        reason: e.to_string(),
    }
}
