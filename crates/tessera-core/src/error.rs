//! Error types for `tessera-core`.
//!
//! Each variant carries enough context to diagnose the problem from logs.
//! None of them carry secret material: signature errors describe what was
//! wrong with the header, never the expected digest.

use tessera_storage::StoreError;

/// Errors from session token verification.
///
/// Every variant means the caller is unauthenticated; the distinction only
/// matters for logs.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token does not have the `payload.signature` shape.
    #[error("malformed session token: {reason}")]
    Malformed { reason: String },

    /// The signature does not match the payload.
    #[error("session signature mismatch")]
    BadSignature,

    /// The token was valid but has expired.
    #[error("session expired at {expired_at}")]
    Expired { expired_at: i64 },

    /// The signed subject no longer exists.
    #[error("session principal {user_id} does not exist")]
    UnknownPrincipal { user_id: uuid::Uuid },
}

/// Errors from tenant resolution.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    /// The slug is not URL-safe.
    #[error("invalid tenant slug '{slug}'")]
    InvalidSlug { slug: String },

    /// No tenant has this slug.
    #[error("tenant not found: {slug}")]
    NotFound { slug: String },

    /// The path tenant is not the caller's tenant.
    #[error("tenant mismatch: path tenant {path_tenant} is not session tenant {session_tenant}")]
    Mismatch {
        path_tenant: uuid::Uuid,
        session_tenant: uuid::Uuid,
    },

    /// The tenant store failed.
    #[error("tenant lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the billing-provider client.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The call did not complete within the configured bound.
    #[error("billing provider call '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The provider could not be reached.
    #[error("billing provider transport error: {reason}")]
    Transport { reason: String },

    /// The provider answered with an error status.
    #[error("billing provider rejected '{operation}' with status {status}: {reason}")]
    Rejected {
        operation: &'static str,
        status: u16,
        reason: String,
    },

    /// The provider answered with a body we could not interpret.
    #[error("invalid billing provider response: {reason}")]
    InvalidResponse { reason: String },

    /// The provider reported a subscription status this build does not know.
    #[error("subscription {subscription} has unrecognized status '{status}'")]
    UnrecognizedStatus { subscription: String, status: String },
}

/// Errors from webhook signature verification.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// No signature header was supplied.
    #[error("missing signature header")]
    Missing,

    /// The header lacks a timestamp or any `v1` entry.
    #[error("malformed signature header: {reason}")]
    Malformed { reason: String },

    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp {timestamp} outside tolerance of {tolerance_secs}s")]
    OutsideTolerance { timestamp: i64, tolerance_secs: i64 },

    /// No `v1` entry matches the expected digest.
    #[error("no matching signature")]
    Mismatch,
}

/// Errors from webhook processing.
///
/// The variant decides whether the provider should redeliver: only
/// [`WebhookError::Transient`] is retryable.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The event is not authentic. Never retried.
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),

    /// The event is authentic but structurally invalid. Never retried.
    #[error("malformed webhook event: {reason}")]
    Malformed { reason: String },

    /// A datastore or provider failure; nothing was applied.
    #[error("transient webhook failure: {reason}")]
    Transient { reason: String },
}

impl WebhookError {
    /// Whether the provider should redeliver this event.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors from the cancellation request path.
#[derive(Debug, thiserror::Error)]
pub enum CancellationError {
    /// The subscription does not exist in the caller's tenant.
    #[error("subscription not found: {id}")]
    NotFound { id: uuid::Uuid },

    /// The subscription is already in a terminal state.
    #[error("subscription {id} is already canceled")]
    AlreadyCanceled { id: uuid::Uuid },

    /// A cancellation is already pending at period end.
    #[error("subscription {id} is already set to cancel at period end")]
    AlreadyPending { id: uuid::Uuid },

    /// The billing provider call failed; no local state was changed.
    #[error("billing provider error: {0}")]
    Provider(#[from] BillingError),

    /// The datastore failed.
    #[error("cancellation storage error: {0}")]
    Store(#[from] StoreError),
}

/// An illegal subscription lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal lifecycle transition from {from} on {event}")]
pub struct TransitionError {
    pub from: crate::lifecycle::LifecycleState,
    pub event: &'static str,
}
