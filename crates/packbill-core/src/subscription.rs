//! Subscription model and its state machine.
//!
//! Every transition here is a pure function from the current record to the next
//! one. Persisting the result (and detecting a concurrent writer) is the store's
//! job; see `packbill_store::Store::replace_subscription`.
//!
//! # Activation
//!
//! A verified purchase lands in one of three ways, chosen by [`decide`]:
//!
//! - no subscription yet: create one, active from now ([`Activation::CreateActive`])
//! - the current period has ended: overwrite the terms in place
//!   ([`Activation::ReplaceExpired`])
//! - the current period is still running: queue the purchase for the period end
//!   ([`Activation::ScheduleChange`]), leaving paid time untouched

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::days_until;
use crate::error::{BillingError, Result};
use crate::ids::{SubscriptionId, UserId};
use crate::plan::{BillingCycle, FeatureSet, PlanType};
use crate::usage::UsageStats;

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Inside the free trial window.
    Trial,
    /// Paid and running.
    Active,
    /// The period ended without renewal.
    Expired,
    /// Cancelled by the user or by a refund. Paid time is not forfeited.
    Cancelled,
}

impl SubscriptionStatus {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plan change queued until the current period ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledChange {
    /// Plan that takes over.
    pub next_plan: PlanType,

    /// Cycle that takes over. `None` keeps the current cycle.
    pub next_billing_cycle: Option<BillingCycle>,

    /// When the change was requested.
    pub scheduled_at: DateTime<Utc>,

    /// When the change becomes applicable; equal to `end_date` when it was set.
    pub scheduled_for: DateTime<Utc>,
}

/// Audit copy of the payment that last paid for this subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Gateway order id.
    pub order_id: String,

    /// Gateway payment id.
    pub transaction_id: String,

    /// Amount in whole currency units.
    pub amount: i64,

    /// ISO currency code.
    pub currency: String,

    /// Payment method reported by the gateway, when it could be fetched.
    pub payment_method: Option<String>,

    /// When the payment was confirmed.
    pub payment_date: DateTime<Utc>,
}

/// A confirmed purchase, ready to be applied to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    /// The buyer.
    pub user_id: UserId,
    /// Purchased plan.
    pub plan: PlanType,
    /// Purchased cycle.
    pub billing_cycle: BillingCycle,
    /// Payment audit record.
    pub details: PaymentDetails,
}

/// A user's subscription. One per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Record id.
    pub id: SubscriptionId,

    /// Owner. Unique across subscriptions.
    pub user_id: UserId,

    /// Plan currently in force.
    pub plan: PlanType,

    /// Cycle currently in force.
    pub billing_cycle: BillingCycle,

    /// Stored status. See [`Subscription::effective_status`] for the time-aware view.
    pub status: SubscriptionStatus,

    /// Whether the current terms are a trial.
    pub is_trial: bool,

    /// Start of the current period.
    pub start_date: DateTime<Utc>,

    /// End of the current period. The authoritative plan boundary.
    pub end_date: DateTime<Utc>,

    /// Set only during the trial window.
    pub trial_end_date: Option<DateTime<Utc>>,

    /// Pending plan change.
    pub scheduled_change: Option<ScheduledChange>,

    /// Feature snapshot taken when the current terms were activated.
    pub features: FeatureSet,

    /// Payment that last paid for this subscription.
    pub payment_details: Option<PaymentDetails>,

    /// Monthly usage counters.
    pub usage: UsageStats,

    /// Whether the subscription renews at period end.
    pub auto_renew: bool,

    /// Optimistic concurrency counter, bumped by the store on each write.
    pub version: u64,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last changed.
    pub updated_at: DateTime<Utc>,
}

/// How a verified purchase is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// No subscription exists; create one in the active state.
    CreateActive,
    /// The subscription's period has ended; overwrite its terms in place.
    ReplaceExpired,
    /// The subscription's period is still running; queue the purchase.
    ScheduleChange,
}

impl Activation {
    /// Whether the purchase takes effect now.
    #[must_use]
    pub const fn is_immediate(&self) -> bool {
        !matches!(self, Self::ScheduleChange)
    }
}

/// Choose how a purchase applies to the existing subscription.
#[must_use]
pub fn decide(now: DateTime<Utc>, existing: Option<&Subscription>) -> Activation {
    match existing {
        None => Activation::CreateActive,
        Some(sub) if sub.end_date > now => Activation::ScheduleChange,
        Some(_) => Activation::ReplaceExpired,
    }
}

/// Apply a purchase, returning the decision and the next subscription state.
#[must_use]
pub fn activate(
    now: DateTime<Utc>,
    existing: Option<&Subscription>,
    purchase: &Purchase,
) -> (Activation, Subscription) {
    let activation = decide(now, existing);
    let next = match (activation, existing) {
        (Activation::ScheduleChange, Some(sub)) => sub.schedule_purchase(now, purchase),
        (Activation::ReplaceExpired, Some(sub)) => sub.replace_terms(now, purchase),
        _ => Subscription::new_active(now, purchase),
    };
    (activation, next)
}

impl Subscription {
    /// A trial subscription lasting `trial_days` from `now`.
    #[must_use]
    pub fn new_trial(user_id: UserId, now: DateTime<Utc>, trial_days: i64) -> Self {
        let end = now + Duration::days(trial_days);
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan: PlanType::Trial,
            billing_cycle: BillingCycle::Monthly,
            status: SubscriptionStatus::Trial,
            is_trial: true,
            start_date: now,
            end_date: end,
            trial_end_date: Some(end),
            scheduled_change: None,
            features: PlanType::Trial.features(),
            payment_details: None,
            usage: UsageStats::new(now),
            auto_renew: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A freshly purchased subscription, active for one period from `now`.
    #[must_use]
    pub fn new_active(now: DateTime<Utc>, purchase: &Purchase) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id: purchase.user_id,
            plan: purchase.plan,
            billing_cycle: purchase.billing_cycle,
            status: SubscriptionStatus::Active,
            is_trial: false,
            start_date: now,
            end_date: purchase.billing_cycle.period_end(now),
            trial_end_date: None,
            scheduled_change: None,
            features: purchase.plan.features(),
            payment_details: Some(purchase.details.clone()),
            usage: UsageStats::new(now),
            auto_renew: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Paid and inside the current period.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }

    /// Inside the trial window.
    #[must_use]
    pub fn is_trial_active(&self, now: DateTime<Utc>) -> bool {
        self.is_trial && self.trial_end_date.is_some_and(|end| end > now)
    }

    /// Whether gated features are available.
    #[must_use]
    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        self.is_trial_active(now) || self.is_active(now)
    }

    /// Whether `now` falls before the period boundary, regardless of status.
    #[must_use]
    pub fn in_paid_period(&self, now: DateTime<Utc>) -> bool {
        now < self.end_date
    }

    /// Status as of `now`: trial and active records past their end read as expired.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.status {
            SubscriptionStatus::Trial | SubscriptionStatus::Active if self.end_date <= now => {
                SubscriptionStatus::Expired
            }
            status => status,
        }
    }

    /// Overwrite the terms with a purchase starting now. Clears trial and schedule.
    #[must_use]
    pub fn replace_terms(&self, now: DateTime<Utc>, purchase: &Purchase) -> Self {
        Self {
            plan: purchase.plan,
            billing_cycle: purchase.billing_cycle,
            status: SubscriptionStatus::Active,
            is_trial: false,
            start_date: now,
            end_date: purchase.billing_cycle.period_end(now),
            trial_end_date: None,
            scheduled_change: None,
            features: purchase.plan.features(),
            payment_details: Some(purchase.details.clone()),
            auto_renew: true,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Queue a purchase for the end of the current period. Current terms are kept.
    #[must_use]
    pub fn schedule_purchase(&self, now: DateTime<Utc>, purchase: &Purchase) -> Self {
        Self {
            scheduled_change: Some(ScheduledChange {
                next_plan: purchase.plan,
                next_billing_cycle: Some(purchase.billing_cycle),
                scheduled_at: now,
                scheduled_for: self.end_date,
            }),
            payment_details: Some(purchase.details.clone()),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Queue a plan change without a purchase.
    ///
    /// Only a paid subscription inside its period can queue a change. A cycle
    /// already queued by a purchase is kept.
    ///
    /// # Errors
    ///
    /// - `BillingError::NoActiveSubscription` unless the subscription is active at `now`.
    /// - `BillingError::InvalidPlanTransition` when `new_plan` is the current plan.
    /// - `BillingError::InvalidPlan` for the trial plan.
    pub fn schedule_change(&self, now: DateTime<Utc>, new_plan: PlanType) -> Result<Self> {
        if !self.is_active(now) {
            return Err(BillingError::NoActiveSubscription);
        }
        if !new_plan.is_purchasable() {
            return Err(BillingError::InvalidPlan(new_plan.to_string()));
        }
        if new_plan == self.plan {
            return Err(BillingError::InvalidPlanTransition {
                from: self.plan,
                to: new_plan,
            });
        }
        Ok(Self {
            scheduled_change: Some(ScheduledChange {
                next_plan: new_plan,
                next_billing_cycle: self
                    .scheduled_change
                    .as_ref()
                    .and_then(|change| change.next_billing_cycle),
                scheduled_at: now,
                scheduled_for: self.end_date,
            }),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Drop the pending plan change.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::NoScheduledChange` when nothing is pending.
    pub fn cancel_scheduled_change(&self, now: DateTime<Utc>) -> Result<Self> {
        if self.scheduled_change.is_none() {
            return Err(BillingError::NoScheduledChange);
        }
        Ok(Self {
            scheduled_change: None,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Move the pending plan change into force.
    ///
    /// The new period starts at `scheduled_for` (not `now`) and lasts one period of
    /// the new cycle, so a late trigger does not shift the billing calendar.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::NoScheduledChange` when nothing is pending, and
    /// `BillingError::ChangeNotDue` when `scheduled_for` is still in the future.
    pub fn apply_scheduled_change(&self, now: DateTime<Utc>) -> Result<Self> {
        let change = self
            .scheduled_change
            .as_ref()
            .ok_or(BillingError::NoScheduledChange)?;

        if change.scheduled_for > now {
            return Err(BillingError::ChangeNotDue {
                scheduled_for: change.scheduled_for,
                days_remaining: days_until(now, change.scheduled_for),
            });
        }

        let cycle = change.next_billing_cycle.unwrap_or(self.billing_cycle);
        Ok(Self {
            plan: change.next_plan,
            billing_cycle: cycle,
            status: SubscriptionStatus::Active,
            is_trial: false,
            start_date: change.scheduled_for,
            end_date: cycle.period_end(change.scheduled_for),
            trial_end_date: None,
            scheduled_change: None,
            features: change.next_plan.features(),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Whether a pending change is due at `now`.
    #[must_use]
    pub fn has_due_change(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_change
            .as_ref()
            .is_some_and(|change| change.scheduled_for <= now)
    }

    /// Cancel the subscription. Paid time up to `end_date` is kept; a trial ends.
    #[must_use]
    pub fn cancel(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: SubscriptionStatus::Cancelled,
            is_trial: false,
            trial_end_date: None,
            auto_renew: false,
            scheduled_change: None,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Record one gated calculation over `boxes` box types.
    #[must_use]
    pub fn with_usage(&self, now: DateTime<Utc>, boxes: u64) -> Self {
        let mut next = self.clone();
        next.usage.record(now, boxes);
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase(plan: PlanType, cycle: BillingCycle, now: DateTime<Utc>) -> Purchase {
        Purchase {
            user_id: UserId::generate(),
            plan,
            billing_cycle: cycle,
            details: PaymentDetails {
                order_id: "order_1".to_string(),
                transaction_id: "pay_1".to_string(),
                amount: plan.price(cycle),
                currency: "INR".to_string(),
                payment_method: None,
                payment_date: now,
            },
        }
    }

    fn active_starter(now: DateTime<Utc>, days_left: i64) -> Subscription {
        let p = purchase(PlanType::Starter, BillingCycle::Monthly, now);
        let mut sub = Subscription::new_active(now - Duration::days(20), &p);
        sub.end_date = now + Duration::days(days_left);
        sub
    }

    #[test]
    fn decide_branches_on_end_date() {
        let now = Utc::now();
        assert_eq!(decide(now, None), Activation::CreateActive);
        assert_eq!(
            decide(now, Some(&active_starter(now, 10))),
            Activation::ScheduleChange
        );
        assert_eq!(
            decide(now, Some(&active_starter(now, -1))),
            Activation::ReplaceExpired
        );
    }

    #[test]
    fn end_date_equal_to_now_is_expired() {
        let now = Utc::now();
        assert_eq!(
            decide(now, Some(&active_starter(now, 0))),
            Activation::ReplaceExpired
        );
    }

    #[test]
    fn create_active_runs_one_period() {
        let now = Utc::now();
        let p = purchase(PlanType::Pro, BillingCycle::Annually, now);
        let (activation, sub) = activate(now, None, &p);
        assert_eq!(activation, Activation::CreateActive);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(!sub.is_trial);
        assert_eq!(sub.end_date, BillingCycle::Annually.period_end(now));
        assert!(sub.scheduled_change.is_none());
        assert_eq!(sub.features, PlanType::Pro.features());
    }

    #[test]
    fn active_period_queues_purchase_without_touching_terms() {
        let now = Utc::now();
        let current = active_starter(now, 10);
        let p = purchase(PlanType::Pro, BillingCycle::Monthly, now);

        let (activation, next) = activate(now, Some(&current), &p);
        assert_eq!(activation, Activation::ScheduleChange);
        assert_eq!(next.plan, PlanType::Starter);
        assert_eq!(next.end_date, current.end_date);
        assert_eq!(next.status, current.status);

        let change = next.scheduled_change.unwrap();
        assert_eq!(change.next_plan, PlanType::Pro);
        assert_eq!(change.scheduled_for, current.end_date);
        assert_eq!(days_until(now, change.scheduled_for), 10);
    }

    #[test]
    fn expired_subscription_is_replaced_in_place() {
        let now = Utc::now();
        let mut trial = Subscription::new_trial(UserId::generate(), now - Duration::days(30), 14);
        trial.scheduled_change = Some(ScheduledChange {
            next_plan: PlanType::Pro,
            next_billing_cycle: None,
            scheduled_at: now - Duration::days(20),
            scheduled_for: trial.end_date,
        });
        let p = purchase(PlanType::Exclusive, BillingCycle::Monthly, now);

        let (activation, next) = activate(now, Some(&trial), &p);
        assert_eq!(activation, Activation::ReplaceExpired);
        assert_eq!(next.id, trial.id);
        assert_eq!(next.status, SubscriptionStatus::Active);
        assert!(!next.is_trial);
        assert!(next.trial_end_date.is_none());
        assert!(next.scheduled_change.is_none());
        assert_eq!(next.end_date, BillingCycle::Monthly.period_end(now));
    }

    #[test]
    fn apply_before_due_reports_days_remaining() {
        let now = Utc::now();
        let sub = active_starter(now, 4)
            .schedule_change(now, PlanType::Pro)
            .unwrap();
        let err = sub.apply_scheduled_change(now).unwrap_err();
        assert!(matches!(
            err,
            BillingError::ChangeNotDue { days_remaining: 4, .. }
        ));
    }

    #[test]
    fn apply_uses_scheduled_date_and_new_cycle() {
        let now = Utc::now();
        let current = active_starter(now, 3);
        let p = purchase(PlanType::Exclusive, BillingCycle::Annually, now);
        let (_, queued) = activate(now, Some(&current), &p);

        let later = now + Duration::days(5);
        let applied = queued.apply_scheduled_change(later).unwrap();
        assert_eq!(applied.plan, PlanType::Exclusive);
        assert_eq!(applied.billing_cycle, BillingCycle::Annually);
        assert_eq!(applied.start_date, current.end_date);
        assert_eq!(
            applied.end_date,
            BillingCycle::Annually.period_end(current.end_date)
        );
        assert!(applied.scheduled_change.is_none());

        // A second trigger finds nothing to apply.
        assert_eq!(
            applied.apply_scheduled_change(later).unwrap_err(),
            BillingError::NoScheduledChange
        );
    }

    #[test]
    fn change_to_same_plan_is_rejected() {
        let now = Utc::now();
        let sub = active_starter(now, 10);
        assert!(matches!(
            sub.schedule_change(now, PlanType::Starter),
            Err(BillingError::InvalidPlanTransition { .. })
        ));
        assert!(sub.schedule_change(now, PlanType::Trial).is_err());
    }

    #[test]
    fn cancel_keeps_paid_time() {
        let now = Utc::now();
        let sub = active_starter(now, 10)
            .schedule_change(now, PlanType::Pro)
            .unwrap()
            .cancel(now);
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert!(!sub.auto_renew);
        assert!(sub.scheduled_change.is_none());
        assert!(sub.in_paid_period(now));
        assert!(!sub.has_access(now));
    }

    #[test]
    fn cancelled_trial_loses_access() {
        let now = Utc::now();
        let sub = Subscription::new_trial(UserId::generate(), now, 14).cancel(now);
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert!(!sub.is_trial);
        assert!(sub.trial_end_date.is_none());
        assert!(!sub.has_access(now));
        assert_eq!(sub.effective_status(now), SubscriptionStatus::Cancelled);
    }

    #[test]
    fn change_requires_active_period() {
        let now = Utc::now();
        for sub in [
            active_starter(now, -3),
            active_starter(now, 0),
            active_starter(now, 10).cancel(now),
            Subscription::new_trial(UserId::generate(), now, 14),
        ] {
            assert_eq!(
                sub.schedule_change(now, PlanType::Exclusive).unwrap_err(),
                BillingError::NoActiveSubscription
            );
        }
    }

    #[test]
    fn change_keeps_purchased_cycle() {
        let now = Utc::now();
        let p = purchase(PlanType::Exclusive, BillingCycle::Annually, now);
        let (_, queued) = activate(now, Some(&active_starter(now, 6)), &p);

        let changed = queued.schedule_change(now, PlanType::Pro).unwrap();
        let change = changed.scheduled_change.unwrap();
        assert_eq!(change.next_plan, PlanType::Pro);
        assert_eq!(change.next_billing_cycle, Some(BillingCycle::Annually));

        let fresh = active_starter(now, 6)
            .schedule_change(now, PlanType::Pro)
            .unwrap();
        assert!(fresh.scheduled_change.unwrap().next_billing_cycle.is_none());
    }

    #[test]
    fn trial_access_and_expiry() {
        let now = Utc::now();
        let trial = Subscription::new_trial(UserId::generate(), now, 14);
        assert!(trial.has_access(now));
        assert_eq!(trial.effective_status(now), SubscriptionStatus::Trial);

        let after = now + Duration::days(15);
        assert!(!trial.has_access(after));
        assert_eq!(trial.effective_status(after), SubscriptionStatus::Expired);
    }

    #[test]
    fn cancel_scheduled_change_requires_pending_change() {
        let now = Utc::now();
        let sub = active_starter(now, 10);
        assert_eq!(
            sub.cancel_scheduled_change(now).unwrap_err(),
            BillingError::NoScheduledChange
        );
        let cleared = sub
            .schedule_change(now, PlanType::Exclusive)
            .unwrap()
            .cancel_scheduled_change(now)
            .unwrap();
        assert!(cleared.scheduled_change.is_none());
    }
}
