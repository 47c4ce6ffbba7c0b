//! Backend-independent write rules.
//!
//! Both backends read the affected records under their write lock, run them
//! through these functions, and persist whatever comes back.

use chrono::{DateTime, Duration, Utc};
use packbill_core::{
    BillingError, Payment, PaymentPatch, PaymentStatus, Subscription, SubscriptionStatus,
};

use crate::error::{Result, StoreError};

/// Reject the write unless the stored version is the one the writer read.
pub(crate) fn check_version(current: Option<&Subscription>, expected: Option<u64>) -> Result<()> {
    let actual = current.map(|s| s.version);
    if actual == expected {
        Ok(())
    } else {
        Err(StoreError::VersionConflict { expected, actual })
    }
}

/// Copy of `subscription` carrying the version after `previous`.
pub(crate) fn next_version(subscription: &Subscription, previous: Option<u64>) -> Subscription {
    let mut next = subscription.clone();
    next.version = previous.map_or(1, |v| v + 1);
    next
}

/// Apply a patch, returning the patched row and whether it changed.
pub(crate) fn patch_payment(
    mut payment: Payment,
    patch: &PaymentPatch,
    now: DateTime<Utc>,
) -> Result<(Payment, bool)> {
    let changed = patch.apply(&mut payment, now)?;
    Ok((payment, changed))
}

/// Validate an activation and produce the two records to write.
pub(crate) fn prepare_activation(
    payment: &Payment,
    current: Option<&Subscription>,
    next: &Subscription,
    expected_version: Option<u64>,
) -> Result<(Payment, Subscription)> {
    if payment.subscription_id.is_some() {
        return Err(StoreError::AlreadyActivated {
            payment_id: payment.id.to_string(),
        });
    }
    if payment.status != PaymentStatus::Success {
        return Err(BillingError::Validation(format!(
            "payment {} is {}, not success",
            payment.id, payment.status
        ))
        .into());
    }
    if payment.user_id != next.user_id {
        return Err(BillingError::Validation(format!(
            "payment {} belongs to another user",
            payment.id
        ))
        .into());
    }
    check_version(current, expected_version)?;

    let subscription = next_version(next, expected_version);
    let mut linked = payment.clone();
    linked.subscription_id = Some(subscription.id);
    linked.updated_at = subscription.updated_at;
    Ok((linked, subscription))
}

/// Minutes a refund claim blocks further refund requests.
const REFUND_CLAIM_MINUTES: i64 = 10;

/// Mark a successful payment as having a refund in flight.
///
/// A claim older than the hold period is treated as abandoned and taken over.
pub(crate) fn claim_refund(mut payment: Payment, now: DateTime<Utc>) -> Result<Payment> {
    if payment.status != PaymentStatus::Success {
        return Err(BillingError::InvalidPaymentTransition {
            from: payment.status,
            to: PaymentStatus::Refunded,
        }
        .into());
    }
    if let Some(claimed_at) = payment.refund_requested_at {
        if now - claimed_at < Duration::minutes(REFUND_CLAIM_MINUTES) {
            return Err(StoreError::RefundInProgress {
                payment_id: payment.id.to_string(),
            });
        }
    }
    payment.refund_requested_at = Some(now);
    payment.updated_at = now;
    Ok(payment)
}

/// Drop a refund claim, returning the row and whether it changed.
pub(crate) fn release_refund(mut payment: Payment, now: DateTime<Utc>) -> (Payment, bool) {
    if payment.refund_requested_at.take().is_none() {
        return (payment, false);
    }
    payment.updated_at = now;
    (payment, true)
}

/// Records produced by a refund. `None` means the stored copy is already final.
pub(crate) struct RefundWrite {
    pub payment: Payment,
    pub payment_changed: bool,
    pub subscription: Option<Subscription>,
    pub subscription_changed: bool,
}

/// Mark refunded and cascade the cancellation to the linked subscription.
pub(crate) fn prepare_refund(
    payment: Payment,
    current: Option<Subscription>,
    refund_id: &str,
    now: DateTime<Utc>,
) -> Result<RefundWrite> {
    let (payment, payment_changed) = match payment.status {
        PaymentStatus::Success => patch_payment(
            payment,
            &PaymentPatch::status(PaymentStatus::Refunded).with_refund_id(refund_id),
            now,
        )?,
        PaymentStatus::Refunded => (payment, false),
        other => {
            return Err(BillingError::InvalidPaymentTransition {
                from: other,
                to: PaymentStatus::Refunded,
            }
            .into());
        }
    };

    let linked = current.filter(|sub| Some(sub.id) == payment.subscription_id);
    let (subscription, subscription_changed) = match linked {
        Some(sub) if sub.status != SubscriptionStatus::Cancelled || sub.auto_renew => {
            let cancelled = next_version(&sub.cancel(now), Some(sub.version));
            (Some(cancelled), true)
        }
        other => (other, false),
    };

    Ok(RefundWrite {
        payment,
        payment_changed,
        subscription,
        subscription_changed,
    })
}
