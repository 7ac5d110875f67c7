//! User-initiated cancellation at period end.
//!
//! The local row is checked first, so a subscription that is already
//! canceled or already flagged never reaches the provider. On success only
//! the `cancel_at_period_end` flag is mirrored locally; the terminal
//! `canceled` status arrives later through a provider webhook.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tessera_storage::{StoreError, Subscription, SubscriptionStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::{self, BillingProvider};
use crate::error::CancellationError;
use crate::lifecycle::{LifecycleEvent, LifecycleState};

/// Handles cancellation requests from authorized users.
#[derive(Clone)]
pub struct CancellationService {
    subscriptions: Arc<dyn SubscriptionStore>,
    provider: Arc<dyn BillingProvider>,
    provider_timeout: Duration,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

/// Exclusive claim on one subscription's cancellation, released on drop.
struct Claim {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Claim {
    fn take(in_flight: &Arc<Mutex<HashSet<Uuid>>>, id: Uuid) -> Option<Self> {
        let claimed = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        claimed.then(|| Self {
            in_flight: Arc::clone(in_flight),
            id,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl CancellationService {
    #[must_use]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn BillingProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            subscriptions,
            provider,
            provider_timeout,
            in_flight: Arc::default(),
        }
    }

    /// Ask the provider to cancel `subscription_id` at period end.
    ///
    /// `tenant_id` must come from the authorized request context, never
    /// from client input.
    ///
    /// # Errors
    ///
    /// - [`CancellationError::NotFound`] if the tenant owns no such subscription.
    /// - [`CancellationError::AlreadyCanceled`] / [`CancellationError::AlreadyPending`]
    ///   without any provider call. A request racing another one for the
    ///   same subscription is `AlreadyPending`.
    /// - [`CancellationError::Provider`] if the provider call fails or times
    ///   out; nothing is written locally.
    /// - [`CancellationError::Store`] if the datastore fails.
    pub async fn request(&self, tenant_id: Uuid, subscription_id: Uuid) -> Result<Subscription, CancellationError> {
        let current = self
            .subscriptions
            .subscription(tenant_id, subscription_id)
            .await?
            .ok_or(CancellationError::NotFound { id: subscription_id })?;

        match LifecycleState::of(Some(&current)).apply(LifecycleEvent::CancellationRequested) {
            Ok(_) => {}
            Err(e) if e.from.is_terminal() => {
                return Err(CancellationError::AlreadyCanceled { id: subscription_id });
            }
            Err(_) => return Err(CancellationError::AlreadyPending { id: subscription_id }),
        }

        let Some(_claim) = Claim::take(&self.in_flight, subscription_id) else {
            info!(%tenant_id, %subscription_id, "cancellation already in progress");
            return Err(CancellationError::AlreadyPending { id: subscription_id });
        };

        let remote = billing::bounded(
            "cancel_at_period_end",
            self.provider_timeout,
            self.provider
                .cancel_at_period_end(&current.external_subscription_id),
        )
        .await
        .inspect_err(|e| {
            warn!(
                %tenant_id,
                %subscription_id,
                external_id = %current.external_subscription_id,
                error = %e,
                "provider rejected cancellation request"
            );
        })?;

        if !remote.cancel_at_period_end {
            warn!(
                %tenant_id,
                %subscription_id,
                "provider accepted cancellation but did not report the flag; mirroring anyway"
            );
        }

        let updated = self
            .subscriptions
            .mark_cancel_at_period_end(tenant_id, subscription_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => CancellationError::NotFound { id: subscription_id },
                other => CancellationError::Store(other),
            })?;

        info!(%tenant_id, %subscription_id, "subscription set to cancel at period end");
        Ok(updated)
    }
}

impl std::fmt::Debug for CancellationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationService")
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}
