//! Tenant resolution and isolation.
//!
//! Tenant-scoped paths carry the tenant slug as their first segment
//! (`/{tenant}/subscriptions`). Paths whose first segment is a reserved
//! prefix (`/health`, `/webhooks`, ...) carry no tenant.
//!
//! Isolation is checked strictly before capability: a slug that does not
//! resolve to the caller's own tenant ends the request regardless of any
//! permission the caller holds.

use std::sync::Arc;

use tessera_storage::{Tenant, TenantStore};
use uuid::Uuid;

use crate::error::TenantError;

/// Maximum slug length accepted from a path.
const MAX_SLUG_LEN: usize = 64;

/// Check that a slug is URL-safe: `[A-Za-z0-9_-]`, 1-64 characters.
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Extract the tenant slug carried by a request path.
///
/// Returns `None` for the root path and for paths whose first segment is
/// in `reserved`.
#[must_use]
pub fn slug_in_path<'a>(path: &'a str, reserved: &[String]) -> Option<&'a str> {
    let first = path.trim_start_matches('/').split('/').next()?;
    if first.is_empty() || reserved.iter().any(|r| r == first) {
        return None;
    }
    Some(first)
}

/// Maps path-carried tenant slugs to tenant records.
#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
}

impl TenantResolver {
    #[must_use]
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// Resolve a slug to its tenant with a single read.
    ///
    /// # Errors
    ///
    /// - [`TenantError::InvalidSlug`] if the slug is not URL-safe (no read is made).
    /// - [`TenantError::NotFound`] if no tenant has this slug.
    /// - [`TenantError::Store`] if the lookup fails.
    pub async fn resolve(&self, slug: &str) -> Result<Tenant, TenantError> {
        if !is_valid_slug(slug) {
            return Err(TenantError::InvalidSlug {
                slug: slug.to_owned(),
            });
        }

        self.store
            .tenant_by_slug(slug)
            .await?
            .ok_or_else(|| TenantError::NotFound {
                slug: slug.to_owned(),
            })
    }

    /// Load a tenant by id, for callers whose path carries no slug.
    ///
    /// # Errors
    ///
    /// - [`TenantError::NotFound`] if no tenant has this id.
    /// - [`TenantError::Store`] if the lookup fails.
    pub async fn resolve_id(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.store
            .tenant_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound {
                slug: tenant_id.to_string(),
            })
    }

    /// Resolve a slug and require it to be the caller's tenant.
    ///
    /// # Errors
    ///
    /// Everything [`TenantResolver::resolve`] returns, plus
    /// [`TenantError::Mismatch`] when the resolved tenant is not
    /// `session_tenant`.
    pub async fn resolve_for(&self, slug: &str, session_tenant: Uuid) -> Result<Tenant, TenantError> {
        let tenant = self.resolve(slug).await?;
        if tenant.id != session_tenant {
            return Err(TenantError::Mismatch {
                path_tenant: tenant.id,
                session_tenant,
            });
        }
        Ok(tenant)
    }
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver").finish_non_exhaustive()
    }
}
