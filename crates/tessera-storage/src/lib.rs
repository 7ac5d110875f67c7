//! Data model and datastore abstraction for `tessera`.
//!
//! This crate defines the records the authorization core and the billing
//! synchronizer operate on, and the store traits they read and write
//! through. Nothing here knows about HTTP, sessions, or webhook formats.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`] — in-memory, for tests and local development
//! - [`PostgresStore`] — `PostgreSQL` via sqlx (feature `postgres-backend`)
//!
//! Stores are injected explicitly into every component that needs them;
//! there is no process-wide datastore handle.

mod error;
mod memory;
pub mod models;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use models::{
    CheckoutOutcome, InvalidPermission, Permission, Role, Subscription, SubscriptionSnapshot,
    SubscriptionStatus, Tenant, UpsertOutcome, User,
};
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresStore;

use uuid::Uuid;

/// Read access to tenants.
///
/// Every lookup is a single deterministic read.
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync + 'static {
    /// Look up a tenant by its URL slug. `Ok(None)` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError>;

    /// Look up a tenant by id. `Ok(None)` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;

    /// Look up the tenant owning a billing-provider customer id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn tenant_by_customer_id(&self, customer_id: &str)
    -> Result<Option<Tenant>, StoreError>;
}

/// Read access to users and roles.
#[async_trait::async_trait]
pub trait DirectoryStore: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn role(&self, id: Uuid) -> Result<Option<Role>, StoreError>;
}

/// Subscription reads and the writes performed by the billing synchronizer.
///
/// Every write is keyed by `external_subscription_id` and must be safe to
/// repeat: applying the same snapshot twice leaves one row with the same
/// values. Implementations enforce [`Subscription::accepts`] atomically
/// with the write so concurrent deliveries cannot regress settled state.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// List the subscriptions owned by a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn subscriptions_for_tenant(&self, tenant_id: Uuid)
    -> Result<Vec<Subscription>, StoreError>;

    /// Fetch one subscription, scoped to its owning tenant.
    ///
    /// Returns `Ok(None)` if the id is unknown or belongs to another tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Apply a completed checkout in one transaction: set the tenant's
    /// customer id (only if unset) and upsert the subscription row.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the tenant does not exist (nothing is written).
    /// - Any other [`StoreError`] if the backend fails; nothing is written.
    async fn record_checkout(
        &self,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<CheckoutOutcome, StoreError>;

    /// Upsert a subscription row by external id, subject to the
    /// monotonicity guard.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn upsert_subscription(
        &self,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Mirror a successful provider-side cancellation request locally.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the subscription is not owned by the tenant.
    /// - Any other [`StoreError`] if the backend fails.
    async fn mark_cancel_at_period_end(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Subscription, StoreError>;
}

/// A backend implementing every store.
pub trait Datastore: TenantStore + DirectoryStore + SubscriptionStore {}

impl<T> Datastore for T where T: TenantStore + DirectoryStore + SubscriptionStore {}
