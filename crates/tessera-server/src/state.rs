//! Shared application state for `tessera` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use tessera_core::authz::Authorizer;
use tessera_core::billing::BillingProvider;
use tessera_core::cancellation::CancellationService;
use tessera_core::error::SessionError;
use tessera_core::session::SessionSigner;
use tessera_core::tenant::TenantResolver;
use tessera_core::webhook::{WebhookProcessor, WebhookSettings};
use tessera_storage::{Datastore, DirectoryStore, SubscriptionStore, TenantStore};

use crate::config::ServerConfig;
use crate::routes::route_table;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Per-request authorization pipeline.
    pub authorizer: Authorizer,
    /// Subscription reads for the tenant-scoped routes.
    pub subscriptions: Arc<dyn SubscriptionStore>,
    /// Billing webhook handling.
    pub webhooks: WebhookProcessor,
    /// Cancellation requests.
    pub cancellation: CancellationService,
    /// Where unauthenticated callers are redirected.
    pub login_path: String,
}

impl AppState {
    /// Wire every component to one datastore and billing provider.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session secret is too short.
    pub fn build<S: Datastore>(
        store: Arc<S>,
        provider: Arc<dyn BillingProvider>,
        config: &ServerConfig,
    ) -> Result<Self, SessionError> {
        let tenants: Arc<dyn TenantStore> = store.clone();
        let directory: Arc<dyn DirectoryStore> = store.clone();
        let subscriptions: Arc<dyn SubscriptionStore> = store;

        let sessions = Arc::new(SessionSigner::new(
            config.session_secret.as_bytes(),
            config.session_ttl,
        )?);

        let authorizer = Authorizer::new(
            sessions,
            directory,
            TenantResolver::new(Arc::clone(&tenants)),
            route_table(&config.login_path, config.unmatched_routes),
        );

        let mut settings = WebhookSettings::new(config.webhook_secret.as_bytes());
        settings.tolerance_secs = config.webhook_tolerance_secs;
        settings.provider_timeout = config.billing.timeout;

        let webhooks = WebhookProcessor::new(
            tenants,
            Arc::clone(&subscriptions),
            Arc::clone(&provider),
            settings,
        );
        let cancellation =
            CancellationService::new(Arc::clone(&subscriptions), provider, config.billing.timeout);

        Ok(Self {
            authorizer,
            subscriptions,
            webhooks,
            cancellation,
            login_path: config.login_path.clone(),
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("login_path", &self.login_path)
            .finish_non_exhaustive()
    }
}
