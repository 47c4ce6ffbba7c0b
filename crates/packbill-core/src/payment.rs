//! Payment ledger model.
//!
//! One [`Payment`] row per order-creation attempt, keyed by the gateway order id.
//! Rows are never deleted. All mutation goes through [`PaymentPatch`], which
//! enforces the forward-only status lifecycle and reports whether anything
//! actually changed, so replayed gateway events are no-ops.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::ids::{PaymentId, SubscriptionId, UserId};
use crate::plan::{BillingCycle, PlanType};

/// Status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Order created, nothing paid yet.
    Created,
    /// Authorized at the gateway, not yet captured.
    Pending,
    /// Captured or verified.
    Success,
    /// Declined, abandoned, or failed verification. Terminal.
    Failed,
    /// Money returned. Terminal.
    Refunded,
}

impl PaymentStatus {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Staying put is always allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Created)
                | (Self::Pending, Self::Pending)
                | (Self::Success, Self::Success)
                | (Self::Failed, Self::Failed)
                | (Self::Refunded, Self::Refunded)
                | (Self::Created, Self::Pending | Self::Success | Self::Failed)
                | (Self::Pending, Self::Success | Self::Failed)
                | (Self::Success, Self::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Internal id.
    pub id: PaymentId,

    /// The buyer.
    pub user_id: UserId,

    /// Linked subscription; set only by a successful activation.
    pub subscription_id: Option<SubscriptionId>,

    /// Gateway order id. Unique across payments.
    pub order_id: String,

    /// Gateway payment id, known once the buyer has paid.
    pub gateway_payment_id: Option<String>,

    /// Signature supplied with the verification.
    pub signature: Option<String>,

    /// Amount in whole currency units.
    pub amount: i64,

    /// ISO currency code.
    pub currency: String,

    /// Requested plan.
    pub plan: PlanType,

    /// Requested cycle.
    pub billing_cycle: BillingCycle,

    /// Current status.
    pub status: PaymentStatus,

    /// Payment method reported by the gateway.
    pub method: Option<String>,

    /// Why the attempt failed.
    pub error_message: Option<String>,

    /// Gateway refund id.
    pub refund_id: Option<String>,

    /// When a refund was last requested from the gateway and not yet settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_requested_at: Option<DateTime<Utc>>,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the payment first reached success.
    pub paid_at: Option<DateTime<Utc>>,

    /// When the row last changed.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A new ledger row for a freshly created gateway order.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` for a non-positive amount.
    pub fn new(
        user_id: UserId,
        order_id: String,
        amount: i64,
        currency: String,
        plan: PlanType,
        billing_cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "{amount} for {plan} {billing_cycle}"
            )));
        }
        Ok(Self {
            id: PaymentId::generate(),
            user_id,
            subscription_id: None,
            order_id,
            gateway_payment_id: None,
            signature: None,
            amount,
            currency,
            plan,
            billing_cycle,
            status: PaymentStatus::Created,
            method: None,
            error_message: None,
            refund_id: None,
            refund_requested_at: None,
            created_at: now,
            paid_at: None,
            updated_at: now,
        })
    }

    /// Amount in minor units (paise, cents) as the gateway expects it.
    #[must_use]
    pub const fn amount_minor(&self) -> i64 {
        self.amount.saturating_mul(100)
    }
}

/// A field-level update to a payment.
///
/// `None` leaves a field alone. `paid_at` is first-write-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentPatch {
    /// New status.
    pub status: Option<PaymentStatus>,
    /// Gateway payment id.
    pub gateway_payment_id: Option<String>,
    /// Verification signature.
    pub signature: Option<String>,
    /// Payment method.
    pub method: Option<String>,
    /// Failure description.
    pub error_message: Option<String>,
    /// Gateway refund id.
    pub refund_id: Option<String>,
    /// Success timestamp.
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentPatch {
    /// A patch that only moves the status.
    #[must_use]
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Mark failed with a reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(PaymentStatus::Failed),
            error_message: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Mark successful at `paid_at`.
    #[must_use]
    pub fn succeeded(paid_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(PaymentStatus::Success),
            paid_at: Some(paid_at),
            ..Self::default()
        }
    }

    /// Also set the gateway payment id.
    #[must_use]
    pub fn with_gateway_payment_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_payment_id = Some(id.into());
        self
    }

    /// Also set the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Also set the payment method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Also set the refund id.
    #[must_use]
    pub fn with_refund_id(mut self, refund_id: impl Into<String>) -> Self {
        self.refund_id = Some(refund_id.into());
        self
    }

    /// Apply to `payment`, returning whether any field changed.
    ///
    /// Nothing is modified when the status transition is not allowed.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPaymentTransition` for a disallowed status move.
    pub fn apply(&self, payment: &mut Payment, now: DateTime<Utc>) -> Result<bool> {
        if let Some(next) = self.status {
            if !payment.status.can_transition_to(next) {
                return Err(BillingError::InvalidPaymentTransition {
                    from: payment.status,
                    to: next,
                });
            }
        }

        let mut changed = false;
        if let Some(next) = self.status {
            changed |= set(&mut payment.status, next);
        }
        changed |= set_some(&mut payment.gateway_payment_id, self.gateway_payment_id.as_ref());
        changed |= set_some(&mut payment.signature, self.signature.as_ref());
        changed |= set_some(&mut payment.method, self.method.as_ref());
        changed |= set_some(&mut payment.error_message, self.error_message.as_ref());
        changed |= set_some(&mut payment.refund_id, self.refund_id.as_ref());
        if payment.paid_at.is_none() && self.paid_at.is_some() {
            payment.paid_at = self.paid_at;
            changed = true;
        }

        if changed {
            payment.updated_at = now;
        }
        Ok(changed)
    }
}

fn set<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        false
    } else {
        *field = value;
        true
    }
}

fn set_some(field: &mut Option<String>, value: Option<&String>) -> bool {
    match value {
        Some(v) if field.as_ref() != Some(v) => {
            *field = Some(v.clone());
            true
        }
        _ => false,
    }
}
