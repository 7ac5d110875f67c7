//! Storage error types.
//!
//! Every variant carries enough context to diagnose the failure without a
//! debugger. Callers on the webhook path use [`StoreError::is_transient`]
//! to decide whether the provider should redeliver.

/// Errors that can occur during datastore operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// The backend could not be reached or opened.
    #[error("datastore unavailable: {reason}")]
    Unavailable { reason: String },

    /// A query failed to execute.
    #[error("query failed during {operation}: {reason}")]
    Query { operation: &'static str, reason: String },

    /// Failed to begin or commit a transaction.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },

    /// A stored row could not be decoded into the data model.
    #[error("corrupt {entity} row: {reason}")]
    Corrupt { entity: &'static str, reason: String },
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Query { .. } | Self::Transaction { .. }
        )
    }
}
