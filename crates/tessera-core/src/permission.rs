//! Effective permission resolution.
//!
//! A user's permissions are exactly the permissions of the role they are
//! assigned, and only inside the tenant they belong to. Anything that does
//! not line up (wrong tenant, missing user, missing or foreign role) yields
//! the empty set; nothing is ever inferred from defaults.
//!
//! Resolution always reads the authoritative store. Nothing is cached
//! across requests, so role changes take effect on the next request.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tessera_storage::{DirectoryStore, Permission, StoreError};
use tracing::debug;
use uuid::Uuid;

/// A set of granted permission keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeSet<Permission>> for PermissionSet {
    fn from(set: BTreeSet<Permission>) -> Self {
        Self(set)
    }
}

/// What a route requires of the caller's permission set.
///
/// Multi-key requirements state their combinator explicitly. `All` is the
/// conventional choice; `Any` must be opted into per rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "permissions", rename_all = "lowercase")]
pub enum Requirement {
    /// Every listed permission must be granted. An empty list always passes.
    All(Vec<Permission>),
    /// At least one listed permission must be granted. An empty list never passes.
    Any(Vec<Permission>),
}

impl Requirement {
    /// A single required permission.
    #[must_use]
    pub fn one(permission: Permission) -> Self {
        Self::All(vec![permission])
    }

    /// Every permission in `permissions` is required.
    #[must_use]
    pub fn all(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self::All(permissions.into_iter().collect())
    }

    /// Any permission in `permissions` suffices.
    #[must_use]
    pub fn any(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self::Any(permissions.into_iter().collect())
    }

    /// Authentication alone suffices.
    #[must_use]
    pub fn authenticated() -> Self {
        Self::All(Vec::new())
    }

    /// Permission keys named by this requirement.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        match self {
            Self::All(keys) | Self::Any(keys) => keys,
        }
    }
}

/// Check a granted set against a requirement.
#[must_use]
pub fn has_permission(granted: &PermissionSet, required: &Requirement) -> bool {
    match required {
        Requirement::All(keys) => keys.iter().all(|k| granted.contains(k)),
        Requirement::Any(keys) => keys.iter().any(|k| granted.contains(k)),
    }
}

/// Computes the effective permission set for a `(user, tenant)` pair.
#[derive(Clone)]
pub struct PermissionResolver {
    directory: Arc<dyn DirectoryStore>,
}

impl PermissionResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    /// Resolve the permissions `user_id` holds inside `tenant_id`.
    ///
    /// Returns the empty set when the user is unknown, belongs to another
    /// tenant, has no role, references a role that no longer exists, or
    /// references a role owned by a different tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory lookup fails. Callers must
    /// treat this as a denial, never as an empty-but-valid answer.
    pub async fn resolve(&self, user_id: Uuid, tenant_id: Uuid) -> Result<PermissionSet, StoreError> {
        let Some(user) = self.directory.user(user_id).await? else {
            debug!(%user_id, "permission resolution for unknown user");
            return Ok(PermissionSet::empty());
        };

        if user.tenant_id != tenant_id {
            debug!(%user_id, %tenant_id, user_tenant = %user.tenant_id, "user is not a member of tenant");
            return Ok(PermissionSet::empty());
        }

        let Some(role_id) = user.role_id else {
            return Ok(PermissionSet::empty());
        };

        let Some(role) = self.directory.role(role_id).await? else {
            debug!(%user_id, %role_id, "dangling role reference");
            return Ok(PermissionSet::empty());
        };

        if !role.is_usable_in(tenant_id) {
            debug!(%user_id, %role_id, %tenant_id, "role belongs to another tenant");
            return Ok(PermissionSet::empty());
        }

        Ok(PermissionSet::from(role.permissions))
    }
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}
