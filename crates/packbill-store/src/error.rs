//! Error types for packbill storage.

use packbill_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// The user already has a subscription.
    #[error("subscription already exists for user {user_id}")]
    DuplicateSubscription {
        /// The user that already has one.
        user_id: String,
    },

    /// A payment with this gateway order id already exists.
    #[error("duplicate order: {order_id}")]
    DuplicateOrder {
        /// The order id that was duplicated.
        order_id: String,
    },

    /// The subscription changed since it was read.
    #[error("version conflict: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        /// Version the writer read (`None`: expected no record).
        expected: Option<u64>,
        /// Version currently stored (`None`: no record).
        actual: Option<u64>,
    },

    /// The payment is already linked to a subscription.
    #[error("payment {payment_id} already activated")]
    AlreadyActivated {
        /// The payment in question.
        payment_id: String,
    },

    /// Another refund request for this payment is still outstanding.
    #[error("refund already in progress for payment {payment_id}")]
    RefundInProgress {
        /// The payment in question.
        payment_id: String,
    },

    /// A domain rule rejected the write.
    #[error(transparent)]
    InvalidTransition(#[from] BillingError),
}
