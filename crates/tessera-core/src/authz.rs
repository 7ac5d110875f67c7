//! Per-request authorization pipeline.
//!
//! Every request walks the same stages, and stops at the first denial:
//!
//! ```text
//! Unauthenticated ─session─▶ Authenticated ─tenant─▶ TenantResolved ─rule─▶ PermissionChecked
//! ```
//!
//! 1. The route table is consulted first only to let explicitly public
//!    routes through without a session.
//! 2. The session token must verify completely; anything less is treated as
//!    no session at all.
//! 3. A slug in the path must resolve to the caller's own tenant. This runs
//!    before any permission check, so a mismatch is denied no matter what
//!    the caller holds.
//! 4. Permissions are resolved fresh from the directory for that tenant.
//! 5. The first matching rule decides. A request no rule covers is a gap
//!    in the route table and is denied unless the table opts into allowing
//!    it.
//!
//! The pipeline never returns an error: datastore failures become a
//! [`DenyReason::Unavailable`] denial.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_storage::{DirectoryStore, Tenant, User};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TenantError;
use crate::permission::{PermissionResolver, PermissionSet, Requirement, has_permission};
use crate::routes::{Access, RouteRule, RouteTable, UnmatchedRoutes};
use crate::session::SessionSigner;
use crate::tenant::{TenantResolver, slug_in_path};

/// A pipeline stage, named by the state its check establishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unauthenticated,
    Authenticated,
    TenantResolved,
    PermissionChecked,
}

/// The parts of a request the pipeline looks at.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub session_token: Option<&'a str>,
}

/// The verified caller, as read from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub tenant_id: Uuid,
    pub role_id: Option<Uuid>,
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            tenant_id: user.tenant_id,
            role_id: user.role_id,
        }
    }
}

/// Context handed to downstream handlers for an allowed request.
///
/// Handlers must scope every read and write to `tenant`, never to a tenant
/// identifier taken from the request itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedRequest {
    pub principal: Principal,
    pub tenant: Tenant,
    pub permissions: PermissionSet,
    /// Pattern of the rule that allowed the request, if any.
    pub rule: Option<String>,
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    MissingSession,
    InvalidSession,
    /// The session's user no longer exists.
    UnknownPrincipal,
    /// The tenant segment is not a valid slug.
    MalformedPath,
    TenantNotFound,
    TenantMismatch,
    MissingPermission { required: Requirement },
    /// No rule covers the request.
    UnmatchedRoute,
    /// A datastore lookup failed.
    Unavailable,
}

/// How a denial should be presented to the caller.
///
/// Several reasons share a kind so that callers cannot tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyKind {
    /// Send the caller to log in.
    Unauthenticated,
    /// Generic access-denied.
    Forbidden,
    /// Indistinguishable from a missing resource.
    Concealed,
    /// The request itself is invalid.
    Invalid,
    /// Try again later.
    Unavailable,
}

impl DenyReason {
    #[must_use]
    pub const fn kind(&self) -> DenyKind {
        match self {
            Self::MissingSession | Self::InvalidSession | Self::UnknownPrincipal => {
                DenyKind::Unauthenticated
            }
            Self::TenantNotFound | Self::TenantMismatch => DenyKind::Concealed,
            Self::MissingPermission { .. } | Self::UnmatchedRoute => DenyKind::Forbidden,
            Self::MalformedPath => DenyKind::Invalid,
            Self::Unavailable => DenyKind::Unavailable,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSession => "missing_session",
            Self::InvalidSession => "invalid_session",
            Self::UnknownPrincipal => "unknown_principal",
            Self::MalformedPath => "malformed_path",
            Self::TenantNotFound => "tenant_not_found",
            Self::TenantMismatch => "tenant_mismatch",
            Self::MissingPermission { .. } => "missing_permission",
            Self::UnmatchedRoute => "unmatched_route",
            Self::Unavailable => "unavailable",
        }
    }
}

/// A denial and the stage whose check refused the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub stage: Stage,
    pub reason: DenyReason,
}

/// The pipeline's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A public route; no session was consulted.
    Public,
    Allowed(Box<AuthorizedRequest>),
    Denied(Denial),
}

impl Decision {
    const fn deny(stage: Stage, reason: DenyReason) -> Self {
        Self::Denied(Denial { stage, reason })
    }

    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Public | Self::Allowed(_))
    }
}

/// Composes session verification, tenant resolution, and permission
/// resolution against a route table.
#[derive(Clone)]
pub struct Authorizer {
    sessions: Arc<SessionSigner>,
    directory: Arc<dyn DirectoryStore>,
    tenants: TenantResolver,
    permissions: PermissionResolver,
    routes: Arc<RouteTable>,
    reserved: Arc<[String]>,
}

impl Authorizer {
    #[must_use]
    pub fn new(
        sessions: Arc<SessionSigner>,
        directory: Arc<dyn DirectoryStore>,
        tenants: TenantResolver,
        routes: RouteTable,
    ) -> Self {
        let reserved = routes.reserved_prefixes().into();
        Self {
            sessions,
            permissions: PermissionResolver::new(directory.clone()),
            directory,
            tenants,
            routes: Arc::new(routes),
            reserved,
        }
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Run the pipeline for one request at the current time.
    pub async fn authorize(&self, request: &AccessRequest<'_>) -> Decision {
        self.authorize_at(request, Utc::now()).await
    }

    /// Run the pipeline for one request as if received at `now`.
    pub async fn authorize_at(&self, request: &AccessRequest<'_>, now: DateTime<Utc>) -> Decision {
        let rule = self.routes.find(request.method, request.path);
        if let Some(RouteRule {
            access: Access::Public,
            ..
        }) = rule
        {
            return Decision::Public;
        }

        // ── Unauthenticated → Authenticated ──────────────────────────

        let Some(token) = request.session_token else {
            debug!(path = %request.path, "no session token");
            return Decision::deny(Stage::Authenticated, DenyReason::MissingSession);
        };

        let claims = match self.sessions.verify(token, now) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(path = %request.path, error = %e, "session rejected");
                return Decision::deny(Stage::Authenticated, DenyReason::InvalidSession);
            }
        };

        let user = match self.directory.user(claims.sub).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!(user_id = %claims.sub, "session for unknown user");
                return Decision::deny(Stage::Authenticated, DenyReason::UnknownPrincipal);
            }
            Err(e) => {
                error!(user_id = %claims.sub, error = %e, "user lookup failed");
                return Decision::deny(Stage::Authenticated, DenyReason::Unavailable);
            }
        };
        let principal = Principal::from(user);

        // ── Authenticated → TenantResolved ───────────────────────────

        let tenant = match slug_in_path(request.path, &self.reserved) {
            Some(slug) => self.tenants.resolve_for(slug, principal.tenant_id).await,
            None => self.tenants.resolve_id(principal.tenant_id).await,
        };
        let tenant = match tenant {
            Ok(tenant) => tenant,
            Err(e) => return self.tenant_denial(&principal, request, &e),
        };

        // ── TenantResolved → PermissionChecked ───────────────────────

        let permissions = match self.permissions.resolve(principal.user_id, tenant.id).await {
            Ok(permissions) => permissions,
            Err(e) => {
                error!(user_id = %principal.user_id, tenant_id = %tenant.id, error = %e, "permission lookup failed");
                return Decision::deny(Stage::PermissionChecked, DenyReason::Unavailable);
            }
        };

        let rule = match rule {
            Some(RouteRule {
                pattern,
                access: Access::Protected(required),
                ..
            }) => {
                if !has_permission(&permissions, required) {
                    info!(
                        user_id = %principal.user_id,
                        tenant_id = %tenant.id,
                        method = %request.method,
                        path = %request.path,
                        rule = %pattern,
                        "missing permission"
                    );
                    return Decision::deny(
                        Stage::PermissionChecked,
                        DenyReason::MissingPermission {
                            required: required.clone(),
                        },
                    );
                }
                Some(pattern.clone())
            }
            // Public rules returned above.
            Some(RouteRule { .. }) => None,
            None => match self.routes.unmatched() {
                UnmatchedRoutes::Deny => {
                    error!(
                        method = %request.method,
                        path = %request.path,
                        "no route rule covers request; denied"
                    );
                    return Decision::deny(Stage::PermissionChecked, DenyReason::UnmatchedRoute);
                }
                UnmatchedRoutes::Allow => {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        "no route rule covers request; allowed by policy"
                    );
                    None
                }
            },
        };

        Decision::Allowed(Box::new(AuthorizedRequest {
            principal,
            tenant,
            permissions,
            rule,
        }))
    }

    fn tenant_denial(&self, principal: &Principal, request: &AccessRequest<'_>, err: &TenantError) -> Decision {
        let reason = match err {
            TenantError::InvalidSlug { slug } => {
                debug!(user_id = %principal.user_id, %slug, "invalid tenant slug in path");
                DenyReason::MalformedPath
            }
            TenantError::NotFound { slug } => {
                info!(user_id = %principal.user_id, %slug, path = %request.path, "unknown tenant");
                DenyReason::TenantNotFound
            }
            TenantError::Mismatch {
                path_tenant,
                session_tenant,
            } => {
                warn!(
                    user_id = %principal.user_id,
                    %path_tenant,
                    %session_tenant,
                    method = %request.method,
                    path = %request.path,
                    "cross-tenant access denied"
                );
                DenyReason::TenantMismatch
            }
            TenantError::Store(e) => {
                error!(user_id = %principal.user_id, error = %e, "tenant lookup failed");
                DenyReason::Unavailable
            }
        };
        Decision::deny(Stage::TenantResolved, reason)
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("rules", &self.routes.rules().len())
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use chrono::Duration;
    use tessera_storage::{MemoryStore, Permission};

    use super::*;
    use crate::testing::{self, FailingStore};

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn routes(unmatched: UnmatchedRoutes) -> RouteTable {
        RouteTable::new(unmatched)
            .rule(RouteRule::public("/health").methods(["GET"]))
            .rule(RouteRule::public("/webhooks/billing").methods(["POST"]))
            .rule(
                RouteRule::protected(
                    "/{tenant}/subscriptions/{id}",
                    Requirement::one(Permission::SUBSCRIPTION_MANAGE),
                )
                .methods(["DELETE"]),
            )
            .rule(
                RouteRule::protected("/{tenant}/subscriptions", Requirement::one(Permission::SUBSCRIPTION_READ))
                    .methods(["GET"]),
            )
            .rule(
                RouteRule::protected(
                    "/{tenant}/users",
                    Requirement::any([Permission::USER_READ, Permission::USER_CREATE]),
                )
                .methods(["GET"]),
            )
            .rule(RouteRule::protected("/{tenant}", Requirement::one(Permission::TENANT_READ)))
    }

    fn authorizer_with(store: MemoryStore, unmatched: UnmatchedRoutes) -> (Authorizer, Arc<SessionSigner>) {
        let signer = Arc::new(SessionSigner::new(KEY, Duration::hours(1)).unwrap());
        let store = Arc::new(store);
        let authz = Authorizer::new(
            signer.clone(),
            store.clone(),
            TenantResolver::new(store),
            routes(unmatched),
        );
        (authz, signer)
    }

    fn authorizer(store: MemoryStore) -> (Authorizer, Arc<SessionSigner>) {
        authorizer_with(store, UnmatchedRoutes::Deny)
    }

    async fn decide(authz: &Authorizer, method: &str, path: &str, token: Option<&str>) -> Decision {
        authz
            .authorize(&AccessRequest {
                method,
                path,
                session_token: token,
            })
            .await
    }

    fn denial(decision: Decision) -> Denial {
        match decision {
            Decision::Denied(d) => d,
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn public_routes_need_no_session() {
        let (authz, _) = authorizer(MemoryStore::new());
        assert_eq!(decide(&authz, "GET", "/health", None).await, Decision::Public);
        assert_eq!(decide(&authz, "POST", "/webhooks/billing", None).await, Decision::Public);
    }

    #[tokio::test]
    async fn missing_or_invalid_session_fails_authentication() {
        let (authz, _) = authorizer(MemoryStore::new());

        let d = denial(decide(&authz, "GET", "/acme/subscriptions", None).await);
        assert_eq!(d.stage, Stage::Authenticated);
        assert_eq!(d.reason, DenyReason::MissingSession);

        let d = denial(decide(&authz, "GET", "/acme/subscriptions", Some("garbage")).await);
        assert_eq!(d.reason, DenyReason::InvalidSession);
        assert_eq!(d.reason.kind(), DenyKind::Unauthenticated);
    }

    #[tokio::test]
    async fn deleted_user_is_unauthenticated() {
        let (authz, signer) = authorizer(MemoryStore::new());
        let token = signer.issue(Uuid::new_v4(), Utc::now());
        let d = denial(decide(&authz, "GET", "/acme", Some(&token)).await);
        assert_eq!(d.reason, DenyReason::UnknownPrincipal);
    }

    #[tokio::test]
    async fn read_only_member_can_list_but_not_cancel() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[Permission::SUBSCRIPTION_READ]).await;
        let (authz, signer) = authorizer(store);
        let token = signer.issue(acme.user.id, Utc::now());

        let Decision::Allowed(ctx) = decide(&authz, "GET", "/acme/subscriptions", Some(&token)).await else {
            panic!("expected list to be allowed");
        };
        assert_eq!(ctx.tenant.id, acme.tenant.id);
        assert_eq!(ctx.rule.as_deref(), Some("/{tenant}/subscriptions"));

        let path = format!("/acme/subscriptions/{}", Uuid::new_v4());
        let d = denial(decide(&authz, "DELETE", &path, Some(&token)).await);
        assert_eq!(d.stage, Stage::PermissionChecked);
        assert!(matches!(d.reason, DenyReason::MissingPermission { .. }));
        assert_eq!(d.reason.kind(), DenyKind::Forbidden);
    }

    #[tokio::test]
    async fn cross_tenant_is_denied_regardless_of_permissions() {
        let store = MemoryStore::new();
        let everything = [
            Permission::TENANT_READ,
            Permission::SUBSCRIPTION_READ,
            Permission::SUBSCRIPTION_MANAGE,
        ];
        let acme = testing::member(&store, "acme", &everything).await;
        testing::member(&store, "globex", &[]).await;
        let (authz, signer) = authorizer(store);
        let token = signer.issue(acme.user.id, Utc::now());

        let d = denial(decide(&authz, "GET", "/globex/subscriptions", Some(&token)).await);
        assert_eq!(d.stage, Stage::TenantResolved);
        assert_eq!(d.reason, DenyReason::TenantMismatch);

        let unknown = denial(decide(&authz, "GET", "/initech/subscriptions", Some(&token)).await);
        assert_eq!(unknown.reason, DenyReason::TenantNotFound);
        // Unknown and foreign tenants look the same to the caller.
        assert_eq!(d.reason.kind(), unknown.reason.kind());
    }

    #[tokio::test]
    async fn invalid_slug_is_malformed() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[Permission::TENANT_READ]).await;
        let (authz, signer) = authorizer(store);
        let token = signer.issue(acme.user.id, Utc::now());

        let d = denial(decide(&authz, "GET", "/ac%20me", Some(&token)).await);
        assert_eq!(d.reason, DenyReason::MalformedPath);
    }

    #[tokio::test]
    async fn any_requirement_needs_one_key() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[Permission::USER_CREATE]).await;
        let (authz, signer) = authorizer(store);
        let token = signer.issue(acme.user.id, Utc::now());

        assert!(decide(&authz, "GET", "/acme/users", Some(&token)).await.is_allowed());
    }

    #[tokio::test]
    async fn unmatched_routes_are_denied_by_default() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[Permission::TENANT_READ]).await;
        let (authz, signer) = authorizer(store);
        let token = signer.issue(acme.user.id, Utc::now());

        let d = denial(decide(&authz, "POST", "/acme/reports", Some(&token)).await);
        assert_eq!(d.reason, DenyReason::UnmatchedRoute);
        assert_eq!(d.stage, Stage::PermissionChecked);
    }

    #[tokio::test]
    async fn unmatched_routes_can_be_opted_into() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[]).await;
        let (authz, signer) = authorizer_with(store, UnmatchedRoutes::Allow);
        let token = signer.issue(acme.user.id, Utc::now());

        let Decision::Allowed(ctx) = decide(&authz, "POST", "/acme/reports", Some(&token)).await else {
            panic!("expected allow");
        };
        assert!(ctx.rule.is_none());
    }

    #[tokio::test]
    async fn tenantless_paths_resolve_the_callers_tenant() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[Permission::TENANT_READ]).await;
        let (authz, signer) = authorizer_with(store, UnmatchedRoutes::Allow);
        let token = signer.issue(acme.user.id, Utc::now());

        let Decision::Allowed(ctx) = decide(&authz, "GET", "/", Some(&token)).await else {
            panic!("expected allow");
        };
        assert_eq!(ctx.tenant.id, acme.tenant.id);
    }

    #[tokio::test]
    async fn role_changes_apply_to_the_next_request() {
        let store = MemoryStore::new();
        let acme = testing::member(&store, "acme", &[]).await;
        let (authz, signer) = authorizer(store.clone());
        let token = signer.issue(acme.user.id, Utc::now());

        assert!(!decide(&authz, "GET", "/acme", Some(&token)).await.is_allowed());

        let mut role = acme.role.clone();
        role.permissions.insert(Permission::TENANT_READ);
        store.insert_role(role).await;

        assert!(decide(&authz, "GET", "/acme", Some(&token)).await.is_allowed());
    }

    #[tokio::test]
    async fn store_failure_denies_as_unavailable() {
        let signer = Arc::new(SessionSigner::new(KEY, Duration::hours(1)).unwrap());
        let failing = Arc::new(FailingStore);
        let authz = Authorizer::new(
            signer.clone(),
            failing.clone(),
            TenantResolver::new(failing),
            routes(UnmatchedRoutes::Deny),
        );
        let token = signer.issue(Uuid::new_v4(), Utc::now());

        let d = denial(decide(&authz, "GET", "/acme", Some(&token)).await);
        assert_eq!(d.reason, DenyReason::Unavailable);
        assert_eq!(d.reason.kind(), DenyKind::Unavailable);
    }
}
