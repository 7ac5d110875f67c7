//! Subscription lifecycle state model.
//!
//! ```text
//! None ─checkout─▶ CheckoutComplete ─▶ Active ⇄ PastDue
//!                                        │        │
//!                                        ▼        ▼
//!                                   CancelPending ─▶ Canceled
//! ```
//!
//! States are derived from a stored row, never persisted on their own.
//! `CancelPending` is not a provider status: it is the local
//! `cancel_at_period_end` flag layered over whatever status the provider
//! last reported. `Canceled` is only entered on a provider event.
//!
//! Transitions are driven by provider events or an explicit cancellation
//! request. Nothing here is time-driven.

use serde::Serialize;
use tessera_storage::{Subscription, SubscriptionStatus};

use crate::error::TransitionError;

/// Where a tenant's subscription sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    None,
    CheckoutComplete,
    Active,
    PastDue,
    CancelPending,
    Canceled,
}

impl LifecycleState {
    /// Derive the lifecycle state of a stored row.
    #[must_use]
    pub fn of(subscription: Option<&Subscription>) -> Self {
        match subscription {
            None => Self::None,
            Some(sub) => Self::from_parts(sub.status, sub.cancel_at_period_end),
        }
    }

    /// Derive the state from a provider status and the local cancel flag.
    ///
    /// A terminal status wins over the flag.
    #[must_use]
    pub const fn from_parts(status: SubscriptionStatus, cancel_at_period_end: bool) -> Self {
        if status.is_terminal() {
            return Self::Canceled;
        }
        if cancel_at_period_end {
            return Self::CancelPending;
        }
        match status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => Self::Active,
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid | SubscriptionStatus::Paused => {
                Self::PastDue
            }
            SubscriptionStatus::Incomplete
            | SubscriptionStatus::IncompleteExpired
            | SubscriptionStatus::Canceled => Self::CheckoutComplete,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CheckoutComplete => "checkout_complete",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::CancelPending => "cancel_pending",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether a user may ask the provider to cancel at period end.
    ///
    /// Only live, not-yet-flagged subscriptions qualify.
    #[must_use]
    pub const fn can_request_cancellation(self) -> bool {
        matches!(self, Self::CheckoutComplete | Self::Active | Self::PastDue)
    }

    /// Apply an event, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the event is not legal in this state.
    pub fn apply(self, event: LifecycleEvent) -> Result<Self, TransitionError> {
        let illegal = || TransitionError {
            from: self,
            event: event.name(),
        };

        match event {
            // Checkout creates the row; replaying it against an existing
            // live row converges on the provider's status.
            LifecycleEvent::CheckoutCompleted { status } => match self {
                Self::Canceled => Err(illegal()),
                Self::None => Ok(Self::from_parts(status, false).at_least_checkout()),
                _ => Ok(Self::from_parts(status, self == Self::CancelPending).at_least_checkout()),
            },
            LifecycleEvent::ProviderUpdate {
                status,
                cancel_at_period_end,
            } => match self {
                Self::None => Err(illegal()),
                Self::Canceled if !status.is_terminal() => Err(illegal()),
                _ => Ok(Self::from_parts(status, cancel_at_period_end)),
            },
            LifecycleEvent::ProviderDeleted => match self {
                Self::None => Err(illegal()),
                _ => Ok(Self::Canceled),
            },
            LifecycleEvent::CancellationRequested => {
                if self.can_request_cancellation() {
                    Ok(Self::CancelPending)
                } else {
                    Err(illegal())
                }
            }
        }
    }

    /// A checked-out subscription never reports `None`.
    const fn at_least_checkout(self) -> Self {
        match self {
            Self::None => Self::CheckoutComplete,
            other => other,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that moves a subscription through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A paid, complete, subscription-mode checkout.
    CheckoutCompleted { status: SubscriptionStatus },
    /// The provider reported new subscription state.
    ProviderUpdate {
        status: SubscriptionStatus,
        cancel_at_period_end: bool,
    },
    /// The provider deleted the subscription.
    ProviderDeleted,
    /// A user asked to cancel at period end and the provider accepted.
    CancellationRequested,
}

impl LifecycleEvent {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout_completed",
            Self::ProviderUpdate { .. } => "provider_update",
            Self::ProviderDeleted => "provider_deleted",
            Self::CancellationRequested => "cancellation_requested",
        }
    }
}
