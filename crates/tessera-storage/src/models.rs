//! Data model shared by every crate in the workspace.
//!
//! Tenants partition all data. A user belongs to exactly one tenant and
//! carries at most one role reference; the pair determines the user's
//! effective permissions. Subscriptions mirror the billing provider's
//! records and are keyed by the provider's subscription id.

use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Tenants ──────────────────────────────────────────────────────────

/// An isolated customer organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    /// URL-safe unique identifier carried in request paths.
    pub slug: String,
    pub name: String,
    /// Billing-provider customer id. `None` until the first checkout.
    pub external_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Permissions & roles ──────────────────────────────────────────────

/// An atomic capability token of the form `resource:action`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const TENANT_READ: Self = Self::from_static("tenant:read");
    pub const TENANT_UPDATE: Self = Self::from_static("tenant:update");
    pub const USER_READ: Self = Self::from_static("user:read");
    pub const USER_CREATE: Self = Self::from_static("user:create");
    pub const USER_DELETE: Self = Self::from_static("user:delete");
    pub const ROLE_MANAGE: Self = Self::from_static("role:manage");
    pub const SUBSCRIPTION_READ: Self = Self::from_static("subscription:read");
    pub const SUBSCRIPTION_MANAGE: Self = Self::from_static("subscription:manage");

    /// Build a permission from a string literal without validation.
    ///
    /// Only for compile-time constants; runtime input goes through
    /// [`Permission::parse`].
    #[must_use]
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    /// Parse and validate a permission key.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPermission`] unless the key is `resource:action`
    /// with both halves non-empty and made of `[a-z0-9_-]`.
    pub fn parse(key: &str) -> Result<Self, InvalidPermission> {
        let valid_part = |part: &str| {
            !part.is_empty()
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        };

        match key.split_once(':') {
            Some((resource, action)) if valid_part(resource) && valid_part(action) => {
                Ok(Self(Cow::Owned(key.to_owned())))
            }
            _ => Err(InvalidPermission {
                key: key.to_owned(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Permission {
    type Error = InvalidPermission;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0.into_owned()
    }
}

/// A permission key failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission key '{key}': expected 'resource:action'")]
pub struct InvalidPermission {
    pub key: String,
}

/// A named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    /// Owning tenant, or `None` for a global default role.
    pub tenant_id: Option<Uuid>,
    pub permissions: BTreeSet<Permission>,
}

impl Role {
    /// Whether this role may be used inside the given tenant.
    #[must_use]
    pub fn is_usable_in(&self, tenant_id: Uuid) -> bool {
        self.tenant_id.is_none_or(|owner| owner == tenant_id)
    }
}

// ── Users ────────────────────────────────────────────────────────────

/// A user with exactly one tenant membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub tenant_id: Uuid,
    /// The user's single role assignment within `tenant_id`.
    pub role_id: Option<Uuid>,
}

// ── Subscriptions ────────────────────────────────────────────────────

/// Subscription status as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Unpaid,
    Paused,
    Canceled,
}

impl SubscriptionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal statuses never transition to anything else.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::IncompleteExpired)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "paused" => Ok(Self::Paused),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// A locally mirrored billing-provider subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Globally unique provider key; the idempotency key for webhook writes.
    pub external_subscription_id: String,
    pub external_customer_id: String,
    pub external_price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Provider timestamp of the last event applied to this row, or the
    /// time of a local cancellation if that is later.
    pub last_event_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether `snapshot` may overwrite this row.
    ///
    /// Rejects snapshots that are older than the last applied event, that
    /// move the billing period backwards, or that would revive a terminal
    /// status. Equal values are accepted so replays converge.
    #[must_use]
    pub fn accepts(&self, snapshot: &SubscriptionSnapshot) -> bool {
        if self.status.is_terminal() && snapshot.status != self.status {
            return false;
        }
        if snapshot.current_period_end < self.current_period_end {
            return false;
        }
        snapshot.observed_at >= self.last_event_at
    }

    /// Build a fresh row from a snapshot.
    #[must_use]
    pub fn from_snapshot(tenant_id: Uuid, snapshot: &SubscriptionSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            external_subscription_id: snapshot.external_subscription_id.clone(),
            external_customer_id: snapshot.external_customer_id.clone(),
            external_price_id: snapshot.external_price_id.clone(),
            status: snapshot.status,
            current_period_start: snapshot.current_period_start,
            current_period_end: snapshot.current_period_end,
            cancel_at_period_end: snapshot.cancel_at_period_end,
            last_event_at: snapshot.observed_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flag the row to cancel at period end, as requested locally at `now`.
    ///
    /// Advances `last_event_at` so provider events created before the
    /// request cannot clear the flag again.
    pub fn mark_cancel_pending(&mut self, now: DateTime<Utc>) {
        self.cancel_at_period_end = true;
        self.last_event_at = self.last_event_at.max(now);
        self.updated_at = now;
    }

    /// Overwrite the provider-owned fields from a snapshot.
    pub fn apply(&mut self, snapshot: &SubscriptionSnapshot, now: DateTime<Utc>) {
        self.external_customer_id.clone_from(&snapshot.external_customer_id);
        self.external_price_id.clone_from(&snapshot.external_price_id);
        self.status = snapshot.status;
        self.current_period_start = snapshot.current_period_start;
        self.current_period_end = snapshot.current_period_end;
        self.cancel_at_period_end = snapshot.cancel_at_period_end;
        self.last_event_at = snapshot.observed_at;
        self.updated_at = now;
    }
}

/// Provider-owned subscription fields, as observed at `observed_at`.
///
/// This is the unit of every webhook write: upserted by
/// `external_subscription_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub external_subscription_id: String,
    pub external_customer_id: String,
    pub external_price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Provider event creation time.
    pub observed_at: DateTime<Utc>,
}

/// Result of upserting a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; one was created.
    Inserted,
    /// The existing row was overwritten.
    Updated,
    /// The snapshot was older than the stored state and was skipped.
    Stale,
    /// The row belongs to a different tenant and was left untouched.
    TenantConflict,
}

/// Result of applying a completed checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutOutcome {
    pub subscription: UpsertOutcome,
    /// The tenant already had a different customer id, which was kept.
    pub customer_id_conflict: bool,
}
