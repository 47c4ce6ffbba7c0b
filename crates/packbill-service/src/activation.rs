//! Applying a successful payment to the buyer's subscription.
//!
//! Shared by the verify endpoint and, when enabled, the `payment.captured`
//! webhook. The store refuses a second activation for the same payment, so
//! whichever path commits first wins and the other sees
//! `StoreError::AlreadyActivated`.

use chrono::{DateTime, Utc};

use packbill_core::{activate, Activation, Payment, PaymentDetails, Purchase, Subscription};
use packbill_store::{Store, StoreError};

/// The payment's purchase, as it will be recorded on the subscription.
#[must_use]
pub fn purchase_for(payment: &Payment, now: DateTime<Utc>) -> Purchase {
    Purchase {
        user_id: payment.user_id,
        plan: payment.plan,
        billing_cycle: payment.billing_cycle,
        details: PaymentDetails {
            order_id: payment.order_id.clone(),
            transaction_id: payment.gateway_payment_id.clone().unwrap_or_default(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method: payment.method.clone(),
            payment_date: payment.paid_at.unwrap_or(now),
        },
    }
}

/// Decide how the payment applies and commit subscription and payment link together.
///
/// # Errors
///
/// - `StoreError::AlreadyActivated` if the payment is already linked.
/// - `StoreError::VersionConflict` if the subscription changed since it was read.
/// - `StoreError::InvalidTransition` if the payment is not successful.
pub fn activate_payment(
    store: &dyn Store,
    payment: &Payment,
    now: DateTime<Utc>,
) -> Result<(Activation, Payment, Subscription), StoreError> {
    let existing = store.get_subscription(&payment.user_id)?;
    let expected_version = existing.as_ref().map(|s| s.version);

    let (activation, next) = activate(now, existing.as_ref(), &purchase_for(payment, now));
    let (payment, subscription) = store.commit_activation(&payment.id, &next, expected_version)?;

    tracing::info!(
        user_id = %payment.user_id,
        payment_id = %payment.id,
        subscription_id = %subscription.id,
        plan = %payment.plan,
        activation = ?activation,
        "Payment applied to subscription"
    );

    Ok((activation, payment, subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use packbill_core::{BillingCycle, PaymentPatch, PlanType, SubscriptionStatus, UserId};
    use packbill_store::{MemoryStore, PaymentKey};

    fn paid(store: &MemoryStore, user_id: UserId, plan: PlanType, now: DateTime<Utc>) -> Payment {
        let payment = Payment::new(
            user_id,
            format!("order_{}", uuid::Uuid::new_v4().simple()),
            plan.price(BillingCycle::Monthly),
            "INR".into(),
            plan,
            BillingCycle::Monthly,
            now,
        )
        .unwrap();
        store.insert_payment(&payment).unwrap();
        store
            .update_payment(
                &PaymentKey::Id(payment.id),
                &PaymentPatch::succeeded(now).with_gateway_payment_id("pay_1"),
                now,
            )
            .unwrap()
            .unwrap()
    }

    #[test]
    fn first_purchase_creates_active_subscription() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = UserId::generate();
        let payment = paid(&store, user_id, PlanType::Pro, now);

        let (activation, linked, sub) = activate_payment(&store, &payment, now).unwrap();
        assert_eq!(activation, Activation::CreateActive);
        assert_eq!(linked.subscription_id, Some(sub.id));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.end_date, BillingCycle::Monthly.period_end(now));
        assert_eq!(sub.payment_details.unwrap().transaction_id, "pay_1");
    }

    #[test]
    fn purchase_during_active_period_is_scheduled() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = UserId::generate();

        let first = paid(&store, user_id, PlanType::Starter, now - Duration::days(20));
        let (_, _, before) = activate_payment(&store, &first, now - Duration::days(20)).unwrap();

        let second = paid(&store, user_id, PlanType::Pro, now);
        let (activation, _, after) = activate_payment(&store, &second, now).unwrap();

        assert_eq!(activation, Activation::ScheduleChange);
        assert_eq!(after.plan, PlanType::Starter);
        assert_eq!(after.end_date, before.end_date);
        let change = after.scheduled_change.unwrap();
        assert_eq!(change.next_plan, PlanType::Pro);
        assert_eq!(change.scheduled_for, before.end_date);
    }

    #[test]
    fn second_activation_of_same_payment_is_refused() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let payment = paid(&store, UserId::generate(), PlanType::Pro, now);

        activate_payment(&store, &payment, now).unwrap();
        let err = activate_payment(&store, &payment, now).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyActivated { .. }));
    }
}
