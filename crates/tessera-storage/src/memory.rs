//! In-memory datastore for tests and local development.
//!
//! All tables live behind a single `RwLock`, so every write is atomic with
//! respect to every other operation. Data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    CheckoutOutcome, Role, Subscription, SubscriptionSnapshot, Tenant, UpsertOutcome, User,
};
use crate::{DirectoryStore, StoreError, SubscriptionStore, TenantStore};

#[derive(Debug, Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    /// Keyed by external subscription id.
    subscriptions: HashMap<String, Subscription>,
}

impl Tables {
    fn upsert(&mut self, tenant_id: Uuid, snapshot: &SubscriptionSnapshot) -> UpsertOutcome {
        let now = Utc::now();
        match self.subscriptions.get_mut(&snapshot.external_subscription_id) {
            Some(row) if row.tenant_id != tenant_id => {
                warn!(
                    subscription_id = %snapshot.external_subscription_id,
                    owner = %row.tenant_id,
                    %tenant_id,
                    "subscription belongs to another tenant; not updated"
                );
                UpsertOutcome::TenantConflict
            }
            Some(row) if row.accepts(snapshot) => {
                row.apply(snapshot, now);
                UpsertOutcome::Updated
            }
            Some(row) => {
                debug!(
                    subscription_id = %snapshot.external_subscription_id,
                    stored_at = %row.last_event_at,
                    observed_at = %snapshot.observed_at,
                    "skipped stale subscription snapshot"
                );
                UpsertOutcome::Stale
            }
            None => {
                let row = Subscription::from_snapshot(tenant_id, snapshot, now);
                self.subscriptions
                    .insert(snapshot.external_subscription_id.clone(), row);
                UpsertOutcome::Inserted
            }
        }
    }
}

/// A datastore backed by hash maps.
///
/// Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.tables.write().await.tenants.insert(tenant.id, tenant);
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn insert_role(&self, role: Role) {
        self.tables.write().await.roles.insert(role.id, role);
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.tables
            .write()
            .await
            .subscriptions
            .insert(subscription.external_subscription_id.clone(), subscription);
    }

    /// Remove a role, leaving any user references dangling.
    pub async fn remove_role(&self, id: Uuid) {
        self.tables.write().await.roles.remove(&id);
    }

    /// Fetch a subscription by its external id, regardless of tenant.
    pub async fn subscription_by_external_id(&self, external_id: &str) -> Option<Subscription> {
        self.tables
            .read()
            .await
            .subscriptions
            .get(external_id)
            .cloned()
    }

    /// Total number of subscription rows.
    pub async fn subscription_count(&self) -> usize {
        self.tables.read().await.subscriptions.len()
    }
}

#[async_trait::async_trait]
impl TenantStore for MemoryStore {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.tables.read().await.tenants.get(&id).cloned())
    }

    async fn tenant_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tenants
            .values()
            .find(|t| t.external_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }
}

#[async_trait::async_trait]
impl DirectoryStore for MemoryStore {
    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn role(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for MemoryStore {
    async fn subscriptions_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Subscription>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Subscription> = tables
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .find(|s| s.id == id && s.tenant_id == tenant_id)
            .cloned())
    }

    async fn record_checkout(
        &self,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<CheckoutOutcome, StoreError> {
        let mut tables = self.tables.write().await;

        let tenant = tables
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "tenant",
                key: tenant_id.to_string(),
            })?;

        let customer_id_conflict = match tenant.external_customer_id.as_deref() {
            None => {
                tenant.external_customer_id = Some(snapshot.external_customer_id.clone());
                false
            }
            Some(existing) => existing != snapshot.external_customer_id,
        };

        let subscription = tables.upsert(tenant_id, snapshot);

        Ok(CheckoutOutcome {
            subscription,
            customer_id_conflict,
        })
    }

    async fn upsert_subscription(
        &self,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(self.tables.write().await.upsert(tenant_id, snapshot))
    }

    async fn mark_cancel_at_period_end(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Subscription, StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .subscriptions
            .values_mut()
            .find(|s| s.id == id && s.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "subscription",
                key: id.to_string(),
            })?;

        row.mark_cancel_pending(Utc::now());
        Ok(row.clone())
    }
}
