//! Feature gate: access, feature flag and box-limit checks for gated endpoints.
//!
//! Every check fails closed with `403`.

use chrono::{DateTime, Utc};
use serde_json::json;

use packbill_core::{Feature, Subscription, UserId};
use packbill_store::Store;

use crate::error::ApiError;

/// Load the caller's subscription and require that it grants access.
///
/// Access means an unexpired trial, or an active subscription inside its period.
pub fn require_access(
    store: &dyn Store,
    user_id: &UserId,
    now: DateTime<Utc>,
) -> Result<Subscription, ApiError> {
    let Some(subscription) = store.get_subscription(user_id)? else {
        tracing::debug!(user_id = %user_id, "Gate: no subscription");
        return Err(ApiError::PlanRestricted {
            message: "No subscription found. Please subscribe to a plan.".into(),
            details: json!({ "subscription_required": true }),
        });
    };

    if !subscription.has_access(now) {
        tracing::debug!(
            user_id = %user_id,
            status = %subscription.status,
            end_date = %subscription.end_date,
            "Gate: subscription inactive"
        );
        return Err(ApiError::PlanRestricted {
            message: "Your subscription has expired. Please renew to continue.".into(),
            details: json!({
                "current_plan": subscription.plan,
                "status": subscription.effective_status(now),
                "upgrade_required": true,
            }),
        });
    }

    Ok(subscription)
}

/// Require a feature flag from the subscription's feature snapshot.
pub fn require_feature(subscription: &Subscription, feature: Feature) -> Result<(), ApiError> {
    if subscription.features.allows(feature) {
        return Ok(());
    }

    Err(ApiError::PlanRestricted {
        message: format!(
            "This feature requires a higher plan. Current plan: {}",
            subscription.plan
        ),
        details: json!({
            "feature": feature,
            "current_plan": subscription.plan,
            "upgrade_required": true,
        }),
    })
}

/// Require that `box_count` fits the plan's box limit.
pub fn check_box_limit(subscription: &Subscription, box_count: usize) -> Result<(), ApiError> {
    let Some(max) = subscription.features.box_limit() else {
        return Ok(());
    };
    let count = u64::try_from(box_count).unwrap_or(u64::MAX);
    let max = u64::from(max);

    if count <= max {
        return Ok(());
    }

    Err(ApiError::PlanRestricted {
        message: format!("Box limit exceeded. Your plan allows up to {max} boxes."),
        details: json!({
            "boxes_exceeded": count - max,
            "current_count": count,
            "max_allowed": max,
            "upgrade_required": true,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use packbill_core::{BillingCycle, PaymentDetails, PlanType, Purchase};
    use packbill_store::MemoryStore;

    fn starter(now: DateTime<Utc>, user_id: UserId) -> Subscription {
        Subscription::new_active(
            now,
            &Purchase {
                user_id,
                plan: PlanType::Starter,
                billing_cycle: BillingCycle::Monthly,
                details: PaymentDetails {
                    order_id: "order_1".into(),
                    transaction_id: "pay_1".into(),
                    amount: 199,
                    currency: "INR".into(),
                    payment_method: None,
                    payment_date: now,
                },
            },
        )
    }

    fn restricted_details(err: ApiError) -> serde_json::Value {
        match err {
            ApiError::PlanRestricted { details, .. } => details,
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn no_subscription_fails_closed() {
        let store = MemoryStore::new();
        let err = require_access(&store, &UserId::generate(), Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::PlanRestricted { .. }));
    }

    #[test]
    fn cancelled_subscription_fails_closed() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = UserId::generate();
        let stored = store.insert_subscription(&starter(now, user_id)).unwrap();
        store
            .replace_subscription(&stored.cancel(now), stored.version)
            .unwrap();

        assert!(require_access(&store, &user_id, now).is_err());
    }

    #[test]
    fn expired_trial_fails_closed() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = UserId::generate();
        store
            .insert_subscription(&Subscription::new_trial(user_id, now - Duration::days(15), 14))
            .unwrap();

        assert!(require_access(&store, &user_id, now).is_err());
    }

    #[test]
    fn starter_box_limit_reports_excess() {
        let now = Utc::now();
        let sub = starter(now, UserId::generate());

        assert!(check_box_limit(&sub, 10).is_ok());
        let details = restricted_details(check_box_limit(&sub, 15).unwrap_err());
        assert_eq!(details["boxes_exceeded"], 5);
        assert_eq!(details["current_count"], 15);
        assert_eq!(details["max_allowed"], 10);
        assert_eq!(details["upgrade_required"], true);
    }

    #[test]
    fn feature_flag_is_checked_against_snapshot() {
        let now = Utc::now();
        let sub = starter(now, UserId::generate());
        assert!(require_feature(&sub, Feature::ThreeDView).is_ok());

        let details = restricted_details(require_feature(&sub, Feature::PdfExport).unwrap_err());
        assert_eq!(details["feature"], "pdf_export");
        assert_eq!(details["current_plan"], "starter");
    }
}
