//! Subscription routes: `/{tenant}/subscriptions[/{id}]`
//!
//! Every query is scoped to the tenant the middleware resolved. The tenant
//! segment of the path is never read here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;
use tessera_core::authz::AuthorizedRequest;
use tessera_core::lifecycle::LifecycleState;
use tessera_storage::Subscription;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// A subscription with its derived lifecycle state.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub lifecycle: LifecycleState,
}

impl From<Subscription> for SubscriptionView {
    fn from(subscription: Subscription) -> Self {
        let lifecycle = LifecycleState::of(Some(&subscription));
        Self {
            subscription,
            lifecycle,
        }
    }
}

/// Response body for `GET /{tenant}/subscriptions`.
#[derive(Debug, Serialize)]
pub struct SubscriptionList {
    pub subscriptions: Vec<SubscriptionView>,
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("invalid subscription id".to_owned()))
}

/// `GET /{tenant}/subscriptions`
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthorizedRequest>,
) -> Result<Json<SubscriptionList>, AppError> {
    let subscriptions = state
        .subscriptions
        .subscriptions_for_tenant(ctx.tenant.id)
        .await?
        .into_iter()
        .map(SubscriptionView::from)
        .collect();
    Ok(Json(SubscriptionList { subscriptions }))
}

/// `GET /{tenant}/subscriptions/{id}`
pub async fn show(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthorizedRequest>,
    Path((_, id)): Path<(String, String)>,
) -> Result<Json<SubscriptionView>, AppError> {
    let id = parse_id(&id)?;
    let subscription = state
        .subscriptions
        .subscription(ctx.tenant.id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(subscription.into()))
}

/// `DELETE /{tenant}/subscriptions/{id}`
///
/// Requests cancellation at period end. The local row reflects the pending
/// cancellation immediately; the terminal status arrives by webhook.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthorizedRequest>,
    Path((_, id)): Path<(String, String)>,
) -> Result<Json<SubscriptionView>, AppError> {
    let id = parse_id(&id)?;
    let subscription = state.cancellation.request(ctx.tenant.id, id).await?;
    info!(
        user_id = %ctx.principal.user_id,
        tenant_id = %ctx.tenant.id,
        subscription_id = %id,
        "cancellation requested"
    );
    Ok(Json(subscription.into()))
}
