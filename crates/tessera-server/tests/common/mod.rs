//! Shared harness for router-level tests.
//!
//! Builds the real router over a [`MemoryStore`] and an in-process billing
//! provider, and issues session tokens with the configured secret.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, Response, StatusCode, header};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tower::ServiceExt;
use tracing::instrument::WithSubscriber;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

use tessera_core::billing::{BillingProvider, ProviderSubscription};
use tessera_core::error::BillingError;
use tessera_core::session::SessionSigner;
use tessera_core::webhook::{SIGNATURE_HEADER, sign};
use tessera_server::config::ServerConfig;
use tessera_server::routes::build_router;
use tessera_server::state::AppState;
use tessera_storage::{MemoryStore, Permission, Role, Subscription, SubscriptionSnapshot, Tenant, User};

pub const SESSION_SECRET: &str = "router-test-session-secret-0123456789abcdef";
pub const WEBHOOK_SECRET: &str = "whsec_router_test";

/// Start of the billing period used by fixtures.
pub const PERIOD_START: i64 = 1_700_000_000;
/// End of the billing period used by fixtures.
pub const PERIOD_END: i64 = 1_702_592_000;

// ── billing provider ─────────────────────────────────────────────────

/// Billing provider backed by a map, counting every call.
#[derive(Debug, Default)]
pub struct StubProvider {
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    calls: AtomicUsize,
}

impl StubProvider {
    pub async fn put(&self, subscription: ProviderSubscription) {
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id.clone(), subscription);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn missing(operation: &'static str) -> BillingError {
        BillingError::Rejected {
            operation,
            status: 404,
            reason: "no such subscription".to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl BillingProvider for StubProvider {
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProviderSubscription, BillingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .await
            .get(external_id)
            .cloned()
            .ok_or_else(|| Self::missing("fetch_subscription"))
    }

    async fn cancel_at_period_end(&self, external_id: &str) -> Result<ProviderSubscription, BillingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut subscriptions = self.subscriptions.lock().await;
        let sub = subscriptions
            .get_mut(external_id)
            .ok_or_else(|| Self::missing("cancel_at_period_end"))?;
        sub.cancel_at_period_end = true;
        Ok(sub.clone())
    }
}

// ── payloads ─────────────────────────────────────────────────────────

pub fn provider_subscription_json(id: &str, customer: &str, status: &str, period_end: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "object": "subscription",
        "customer": customer,
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": period_end - (PERIOD_END - PERIOD_START),
        "current_period_end": period_end,
        "items": { "data": [ { "price": { "id": "price_pro" } } ] }
    })
}

pub fn provider_subscription(id: &str, customer: &str, status: &str) -> ProviderSubscription {
    serde_json::from_value(provider_subscription_json(id, customer, status, PERIOD_END)).unwrap()
}

pub fn event(id: &str, event_type: &str, object: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object }
    })
}

pub fn checkout_event(id: &str, tenant_id: Uuid, subscription: &str, customer: &str) -> serde_json::Value {
    event(
        id,
        "checkout.session.completed",
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

// ── logs ─────────────────────────────────────────────────────────────

/// Formatted log output written while a future ran.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `future` with a subscriber that records everything it logs.
pub async fn capture_logs<F: Future>(future: F) -> (F::Output, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let output = future.with_subscriber(subscriber).await;
    (output, logs)
}

// ── harness ──────────────────────────────────────────────────────────

/// A tenant with one member holding a fixed set of permissions.
#[derive(Debug, Clone)]
pub struct Member {
    pub tenant: Tenant,
    pub user: User,
    pub token: String,
}

pub struct Harness {
    pub app: Router,
    pub store: MemoryStore,
    pub provider: Arc<StubProvider>,
    sessions: SessionSigner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::new(SESSION_SECRET, WEBHOOK_SECRET))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let store = MemoryStore::new();
        let provider = Arc::new(StubProvider::default());
        let state = AppState::build(Arc::new(store.clone()), provider.clone(), &config).unwrap();
        let sessions = SessionSigner::new(config.session_secret.as_bytes(), config.session_ttl).unwrap();
        Self {
            app: build_router(Arc::new(state)),
            store,
            provider,
            sessions,
        }
    }

    /// Insert a tenant and a member whose role grants `permissions`.
    pub async fn member(&self, slug: &str, permissions: &[Permission]) -> Member {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            slug: slug.to_owned(),
            name: format!("{slug} inc"),
            external_customer_id: None,
            created_at: Utc::now(),
        };
        let role = Role {
            id: Uuid::new_v4(),
            name: "member".to_owned(),
            tenant_id: Some(tenant.id),
            permissions: permissions.iter().cloned().collect(),
        };
        let user = User {
            id: Uuid::new_v4(),
            email: format!("someone@{slug}.test"),
            tenant_id: tenant.id,
            role_id: Some(role.id),
        };
        self.store.insert_tenant(tenant.clone()).await;
        self.store.insert_role(role).await;
        self.store.insert_user(user.clone()).await;
        let token = self.sessions.issue(user.id, Utc::now());
        Member { tenant, user, token }
    }

    /// Store a subscription row owned by `tenant_id`.
    pub async fn subscription(
        &self,
        tenant_id: Uuid,
        external_id: &str,
        status: &str,
        cancel_at_period_end: bool,
    ) -> Subscription {
        let sub = provider_subscription(external_id, "cus_router", status);
        let snapshot = SubscriptionSnapshot {
            cancel_at_period_end,
            ..sub
                .to_snapshot(DateTime::from_timestamp(PERIOD_START, 0).unwrap())
                .unwrap()
        };
        let row = Subscription::from_snapshot(tenant_id, &snapshot, Utc::now());
        self.store.insert_subscription(row.clone()).await;
        self.provider
            .put(ProviderSubscription {
                cancel_at_period_end,
                ..sub
            })
            .await;
        row
    }

    /// Link `tenant` to a billing customer, as a completed checkout would.
    pub async fn link_customer(&self, tenant: &Tenant, customer_id: &str) {
        self.store
            .insert_tenant(Tenant {
                external_customer_id: Some(customer_id.to_owned()),
                ..tenant.clone()
            })
            .await;
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Response<Body> {
        self.send(request(Method::GET, path, token)).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Response<Body> {
        self.send(request(Method::DELETE, path, token)).await
    }

    /// Deliver a webhook signed with the configured secret.
    pub async fn webhook(&self, payload: &serde_json::Value) -> Response<Body> {
        let body = serde_json::to_vec(payload).unwrap();
        let signature = sign(&body, WEBHOOK_SECRET.as_bytes(), Utc::now().timestamp()).unwrap();
        self.webhook_raw(body, Some(&signature)).await
    }

    pub async fn webhook_raw(&self, body: Vec<u8>, signature: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/billing")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }
}

pub fn request(method: Method, path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
