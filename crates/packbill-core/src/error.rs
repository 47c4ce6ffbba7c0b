//! Error types for packbill.

use chrono::{DateTime, Utc};

use crate::ids::IdError;
use crate::payment::PaymentStatus;
use crate::plan::PlanType;

/// Result type for packbill domain operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in packbill domain operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    /// Subscription not found.
    #[error("subscription not found: {user_id}")]
    SubscriptionNotFound {
        /// The user whose subscription was not found.
        user_id: String,
    },

    /// Subscription already exists.
    #[error("subscription already exists: {user_id}")]
    SubscriptionAlreadyExists {
        /// The user that already has a subscription.
        user_id: String,
    },

    /// Payment not found.
    #[error("payment not found: {payment}")]
    PaymentNotFound {
        /// The order id or payment id that was not found.
        payment: String,
    },

    /// Unknown plan identifier, or one that cannot be purchased.
    #[error("invalid plan type: {0}")]
    InvalidPlan(String),

    /// Unknown billing cycle.
    #[error("invalid billing cycle: {0}")]
    InvalidBillingCycle(String),

    /// Requested plan is the plan already in force.
    #[error("invalid plan transition from {from} to {to}")]
    InvalidPlanTransition {
        /// The current plan.
        from: PlanType,
        /// The requested plan.
        to: PlanType,
    },

    /// The subscription is not paid and inside its period.
    #[error("no active subscription")]
    NoActiveSubscription,

    /// No plan change is pending.
    #[error("no scheduled plan change")]
    NoScheduledChange,

    /// The pending plan change is not due yet.
    #[error("scheduled change not due until {scheduled_for} ({days_remaining} days remaining)")]
    ChangeNotDue {
        /// When the change becomes applicable.
        scheduled_for: DateTime<Utc>,
        /// Whole days until then, rounded up.
        days_remaining: i64,
    },

    /// Payment status may not move in this direction.
    #[error("invalid payment transition from {from} to {to}")]
    InvalidPaymentTransition {
        /// The current status.
        from: PaymentStatus,
        /// The requested status.
        to: PaymentStatus,
    },

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed request data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
