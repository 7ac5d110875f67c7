//! Fixtures and fakes shared by unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tessera_storage::{
    CheckoutOutcome, DirectoryStore, MemoryStore, Permission, Role, StoreError, Subscription,
    SubscriptionSnapshot, SubscriptionStore, Tenant, TenantStore, UpsertOutcome, User,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::billing::{BillingProvider, ProviderSubscription};
use crate::error::BillingError;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

pub fn tenant(slug: &str) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        slug: slug.to_owned(),
        name: format!("{slug} inc"),
        external_customer_id: None,
        created_at: Utc::now(),
    }
}

/// A tenant already linked to a billing customer.
pub fn customer_tenant(slug: &str, customer_id: &str) -> Tenant {
    Tenant {
        external_customer_id: Some(customer_id.to_owned()),
        ..tenant(slug)
    }
}

pub fn role(tenant_id: Option<Uuid>, permissions: &[Permission]) -> Role {
    Role {
        id: Uuid::new_v4(),
        name: "member".to_owned(),
        tenant_id,
        permissions: permissions.iter().cloned().collect(),
    }
}

/// A tenant, a role in it, and a user holding that role.
#[derive(Debug, Clone)]
pub struct Member {
    pub tenant: Tenant,
    pub role: Role,
    pub user: User,
}

/// Insert a fresh tenant with one member holding `permissions`.
pub async fn member(store: &MemoryStore, slug: &str, permissions: &[Permission]) -> Member {
    let tenant = tenant(slug);
    let role = role(Some(tenant.id), permissions);
    let user = User {
        id: Uuid::new_v4(),
        email: format!("someone@{slug}.test"),
        tenant_id: tenant.id,
        role_id: Some(role.id),
    };
    store.insert_tenant(tenant.clone()).await;
    store.insert_role(role.clone()).await;
    store.insert_user(user.clone()).await;
    Member { tenant, role, user }
}

/// A stored subscription row for `tenant_id`.
pub fn subscription(tenant_id: Uuid, external_id: &str, status: &str, cancel_at_period_end: bool) -> Subscription {
    let snapshot = SubscriptionSnapshot {
        external_subscription_id: external_id.to_owned(),
        external_customer_id: "cus_1".to_owned(),
        external_price_id: Some("price_pro".to_owned()),
        status: status.parse().unwrap(),
        current_period_start: at(1_700_000_000),
        current_period_end: at(1_702_592_000),
        cancel_at_period_end,
        observed_at: at(1_700_000_000),
    };
    Subscription::from_snapshot(tenant_id, &snapshot, Utc::now())
}

// ── provider payloads ────────────────────────────────────────────────

pub fn provider_subscription_json(id: &str, customer: &str, status: &str, period_end: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "object": "subscription",
        "customer": customer,
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": period_end - 2_592_000,
        "current_period_end": period_end,
        "items": { "data": [ { "price": { "id": "price_pro" } } ] }
    })
}

pub fn provider_subscription(id: &str, customer: &str, status: &str, period_end: i64) -> ProviderSubscription {
    serde_json::from_value(provider_subscription_json(id, customer, status, period_end)).unwrap()
}

pub fn event(id: &str, event_type: &str, created: i64, object: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": event_type,
        "created": created,
        "data": { "object": object }
    })
}

/// A paid, complete, subscription-mode checkout for `tenant_id`.
pub fn checkout_event(id: &str, created: i64, tenant_id: Uuid, subscription: &str, customer: &str) -> serde_json::Value {
    event(
        id,
        "checkout.session.completed",
        created,
        serde_json::json!({
            "id": format!("cs_{id}"),
            "object": "checkout.session",
            "mode": "subscription",
            "payment_status": "paid",
            "status": "complete",
            "subscription": subscription,
            "customer": customer,
            "metadata": { "tenantId": tenant_id.to_string() }
        }),
    )
}

// ── fakes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Ok,
    Fail,
    Slow(Duration),
}

/// An in-memory billing provider that counts every call.
#[derive(Debug)]
pub struct FakeProvider {
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    calls: AtomicUsize,
    behavior: Behavior,
}

impl FakeProvider {
    fn with(behavior: Behavior) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            behavior,
        }
    }

    pub fn new() -> Self {
        Self::with(Behavior::Ok)
    }

    /// Every call fails with a transport error.
    pub fn failing() -> Self {
        Self::with(Behavior::Fail)
    }

    /// Every call sleeps for `delay` first.
    pub fn slow(delay: Duration) -> Self {
        Self::with(Behavior::Slow(delay))
    }

    pub async fn put(&self, subscription: ProviderSubscription) {
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn get(&self, id: &str) -> Option<ProviderSubscription> {
        self.subscriptions.lock().await.get(id).cloned()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), BillingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Ok => Ok(()),
            Behavior::Fail => Err(BillingError::Transport {
                reason: "connection refused".to_owned(),
            }),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn missing(id: &str, operation: &'static str) -> BillingError {
        BillingError::Rejected {
            operation,
            status: 404,
            reason: format!("no such subscription: {id}"),
        }
    }
}

#[async_trait::async_trait]
impl BillingProvider for FakeProvider {
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProviderSubscription, BillingError> {
        self.enter().await?;
        self.get(external_id)
            .await
            .ok_or_else(|| Self::missing(external_id, "fetch_subscription"))
    }

    async fn cancel_at_period_end(&self, external_id: &str) -> Result<ProviderSubscription, BillingError> {
        self.enter().await?;
        let mut subscriptions = self.subscriptions.lock().await;
        let sub = subscriptions
            .get_mut(external_id)
            .ok_or_else(|| Self::missing(external_id, "cancel_at_period_end"))?;
        sub.cancel_at_period_end = true;
        Ok(sub.clone())
    }
}

/// A datastore whose every operation fails as unavailable.
#[derive(Debug, Clone, Copy)]
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Unavailable {
        reason: "connection reset".to_owned(),
    }
}

#[async_trait::async_trait]
impl TenantStore for FailingStore {
    async fn tenant_by_slug(&self, _slug: &str) -> Result<Option<Tenant>, StoreError> {
        Err(unavailable())
    }

    async fn tenant_by_id(&self, _id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Err(unavailable())
    }

    async fn tenant_by_customer_id(&self, _customer_id: &str) -> Result<Option<Tenant>, StoreError> {
        Err(unavailable())
    }
}

#[async_trait::async_trait]
impl DirectoryStore for FailingStore {
    async fn user(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
        Err(unavailable())
    }

    async fn role(&self, _id: Uuid) -> Result<Option<Role>, StoreError> {
        Err(unavailable())
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for FailingStore {
    async fn subscriptions_for_tenant(&self, _tenant_id: Uuid) -> Result<Vec<Subscription>, StoreError> {
        Err(unavailable())
    }

    async fn subscription(&self, _tenant_id: Uuid, _id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Err(unavailable())
    }

    async fn record_checkout(
        &self,
        _tenant_id: Uuid,
        _snapshot: &SubscriptionSnapshot,
    ) -> Result<CheckoutOutcome, StoreError> {
        Err(unavailable())
    }

    async fn upsert_subscription(
        &self,
        _tenant_id: Uuid,
        _snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        Err(unavailable())
    }

    async fn mark_cancel_at_period_end(&self, _tenant_id: Uuid, _id: Uuid) -> Result<Subscription, StoreError> {
        Err(unavailable())
    }
}
