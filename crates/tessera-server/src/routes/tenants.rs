//! Tenant summary: `GET /{tenant}`

use axum::{Extension, Json};
use serde::Serialize;
use tessera_core::authz::{AuthorizedRequest, Principal};
use tessera_storage::{Permission, Tenant};

/// The caller's view of their own tenant.
#[derive(Debug, Serialize)]
pub struct TenantSummary {
    pub tenant: Tenant,
    pub principal: Principal,
    pub permissions: Vec<Permission>,
}

/// `GET /{tenant}`
pub async fn summary(Extension(ctx): Extension<AuthorizedRequest>) -> Json<TenantSummary> {
    Json(TenantSummary {
        permissions: ctx.permissions.iter().cloned().collect(),
        tenant: ctx.tenant,
        principal: ctx.principal,
    })
}
