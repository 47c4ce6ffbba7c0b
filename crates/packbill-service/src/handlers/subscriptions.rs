//! Subscription handlers: trial, current status, plan changes and cancellation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packbill_core::calendar::same_month;
use packbill_core::{
    days_remaining, days_until, features_for, price_for, BillingCycle, Feature, FeatureSet,
    PlanType, ScheduledChange, Subscription, SubscriptionStatus,
};

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::gate;
use crate::state::AppState;

// ============================================================================
// Views
// ============================================================================

/// A subscription as returned to its owner.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    /// Subscription ID.
    pub id: String,
    /// Plan in force.
    pub plan_type: PlanType,
    /// Stored status.
    pub status: SubscriptionStatus,
    /// Inside the paid (or trial) period and not cancelled.
    pub is_active: bool,
    /// Whether the current terms are a trial.
    pub is_trial: bool,
    /// Billing cycle in force.
    pub billing_cycle: BillingCycle,
    /// Period start.
    pub start_date: DateTime<Utc>,
    /// Period end.
    pub end_date: DateTime<Utc>,
    /// Trial end, during a trial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_end_date: Option<DateTime<Utc>>,
    /// Whole days left in the period, never negative.
    pub days_remaining: i64,
    /// Renews at period end.
    pub auto_renew: bool,
    /// Feature snapshot.
    pub features: FeatureSet,
}

impl SubscriptionView {
    /// Build the view as of `now`.
    #[must_use]
    pub fn new(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            id: subscription.id.to_string(),
            plan_type: subscription.plan,
            status: subscription.status,
            is_active: subscription.in_paid_period(now)
                && subscription.status != SubscriptionStatus::Cancelled,
            is_trial: subscription.is_trial,
            billing_cycle: subscription.billing_cycle,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            trial_end_date: subscription.trial_end_date,
            days_remaining: days_remaining(now, subscription.end_date),
            auto_renew: subscription.auto_renew,
            features: subscription.features,
        }
    }
}

/// A pending plan change.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledChangeView {
    /// Plan that takes over.
    pub next_plan_type: PlanType,
    /// Cycle that takes over.
    pub next_billing_cycle: BillingCycle,
    /// When it takes over.
    pub starts_on: DateTime<Utc>,
    /// When it was requested.
    pub scheduled_at: DateTime<Utc>,
    /// Whole days until it takes over.
    pub days_until_change: i64,
}

impl ScheduledChangeView {
    /// Build the view for a subscription's pending change, if any.
    #[must_use]
    pub fn for_subscription(subscription: &Subscription, now: DateTime<Utc>) -> Option<Self> {
        subscription
            .scheduled_change
            .as_ref()
            .map(|change| Self::new(change, subscription.billing_cycle, now))
    }

    fn new(change: &ScheduledChange, current_cycle: BillingCycle, now: DateTime<Utc>) -> Self {
        Self {
            next_plan_type: change.next_plan,
            next_billing_cycle: change.next_billing_cycle.unwrap_or(current_cycle),
            starts_on: change.scheduled_for,
            scheduled_at: change.scheduled_at,
            days_until_change: days_until(now, change.scheduled_for),
        }
    }
}

fn load(state: &AppState, auth: &AuthUser) -> Result<Subscription, ApiError> {
    state
        .store
        .get_subscription(&auth.user_id)?
        .ok_or_else(|| ApiError::NotFound("No subscription found".into()))
}

// ============================================================================
// Trial and status
// ============================================================================

/// Trial creation response.
#[derive(Debug, Serialize)]
pub struct CreateTrialResponse {
    /// Human readable summary.
    pub message: String,
    /// The new subscription.
    pub subscription: SubscriptionView,
    /// Days in the trial.
    pub trial_days_remaining: i64,
}

/// Start the free trial. One subscription per user, so this works once.
pub async fn create_trial(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CreateTrialResponse>, ApiError> {
    let now = Utc::now();
    let trial_days = state.config.trial_days;

    let subscription = state.store.insert_subscription(&Subscription::new_trial(
        auth.user_id,
        now,
        trial_days,
    ))?;

    tracing::info!(user_id = %auth.user_id, trial_days, "Trial started");

    Ok(Json(CreateTrialResponse {
        message: format!("{trial_days}-day trial activated successfully!"),
        trial_days_remaining: days_remaining(now, subscription.end_date),
        subscription: SubscriptionView::new(&subscription, now),
    }))
}

/// Current subscription response.
#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionResponse {
    /// The subscription.
    pub subscription: SubscriptionView,
    /// Pending plan change.
    #[serde(rename = "scheduledChange", skip_serializing_if = "Option::is_none")]
    pub scheduled_change: Option<ScheduledChangeView>,
}

/// Get the caller's subscription.
pub async fn current(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CurrentSubscriptionResponse>, ApiError> {
    let now = Utc::now();
    let subscription = load(&state, &auth)?;

    Ok(Json(CurrentSubscriptionResponse {
        subscription: SubscriptionView::new(&subscription, now),
        scheduled_change: ScheduledChangeView::for_subscription(&subscription, now),
    }))
}

// ============================================================================
// Plan changes
// ============================================================================

/// Change plan request.
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    /// Plan to switch to at period end.
    #[serde(rename = "newPlanType", alias = "new_plan_type")]
    pub new_plan_type: String,
}

/// Change plan response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanResponse {
    /// Always true.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// Plan in force until the change.
    pub current_plan: PlanType,
    /// Plan after the change.
    pub next_plan: PlanType,
    /// When the change takes over.
    pub next_plan_start_date: DateTime<Utc>,
    /// Whole days until then.
    pub days_until_change: i64,
}

/// Queue a plan change for the end of the current period.
pub async fn change_plan(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ChangePlanRequest>,
) -> Result<Json<ChangePlanResponse>, ApiError> {
    let now = Utc::now();
    let new_plan = PlanType::parse_purchasable(&body.new_plan_type)
        .map_err(|_| ApiError::BadRequest("Invalid plan type".into()))?;

    let subscription = state
        .store
        .get_subscription(&auth.user_id)?
        .ok_or_else(|| ApiError::NotFound("No active subscription found".into()))?;

    let next = subscription.schedule_change(now, new_plan)?;
    let stored = state
        .store
        .replace_subscription(&next, subscription.version)?;

    tracing::info!(
        user_id = %auth.user_id,
        from = %stored.plan,
        to = %new_plan,
        scheduled_for = %stored.end_date,
        "Plan change scheduled"
    );

    Ok(Json(ChangePlanResponse {
        success: true,
        message: format!(
            "Your plan will change to {new_plan} on {}",
            stored.end_date.format("%Y-%m-%d")
        ),
        current_plan: stored.plan,
        next_plan: new_plan,
        next_plan_start_date: stored.end_date,
        days_until_change: days_until(now, stored.end_date),
    }))
}

/// Cancel scheduled change response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelScheduledChangeResponse {
    /// Always true.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// Plan that stays in force.
    pub current_plan: PlanType,
}

/// Drop the pending plan change.
pub async fn cancel_scheduled_change(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CancelScheduledChangeResponse>, ApiError> {
    let now = Utc::now();
    let subscription = load(&state, &auth)?;

    let next = subscription.cancel_scheduled_change(now)?;
    let stored = state
        .store
        .replace_subscription(&next, subscription.version)?;

    tracing::info!(user_id = %auth.user_id, "Scheduled plan change cancelled");

    Ok(Json(CancelScheduledChangeResponse {
        success: true,
        message: "Scheduled plan change cancelled".into(),
        current_plan: stored.plan,
    }))
}

/// Apply scheduled change response.
#[derive(Debug, Serialize)]
pub struct ApplyScheduledChangeResponse {
    /// Always true.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// The subscription under its new terms.
    pub subscription: SubscriptionView,
    /// End of the new period.
    #[serde(rename = "newEndDate")]
    pub new_end_date: DateTime<Utc>,
}

/// Apply the pending plan change once its date has arrived.
pub async fn apply_scheduled_change(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApplyScheduledChangeResponse>, ApiError> {
    let now = Utc::now();
    let subscription = load(&state, &auth)?;

    let next = subscription.apply_scheduled_change(now)?;
    let stored = state
        .store
        .replace_subscription(&next, subscription.version)?;

    tracing::info!(
        user_id = %auth.user_id,
        from = %subscription.plan,
        to = %stored.plan,
        end_date = %stored.end_date,
        "Scheduled plan change applied"
    );

    Ok(Json(ApplyScheduledChangeResponse {
        success: true,
        message: format!(
            "Plan successfully changed to {} starting {}",
            stored.plan,
            stored.start_date.format("%Y-%m-%d")
        ),
        new_end_date: stored.end_date,
        subscription: SubscriptionView::new(&stored, now),
    }))
}

/// Cancel response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Human readable summary.
    pub message: String,
    /// The cancelled subscription.
    pub subscription: SubscriptionView,
    /// What happens to the remaining time.
    pub note: String,
}

/// Cancel the subscription. Paid time is kept until `end_date`.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CancelResponse>, ApiError> {
    let now = Utc::now();
    let subscription = load(&state, &auth)?;

    let stored = state
        .store
        .replace_subscription(&subscription.cancel(now), subscription.version)?;

    tracing::info!(user_id = %auth.user_id, plan = %stored.plan, "Subscription cancelled");

    let view = SubscriptionView::new(&stored, now);
    let note = if stored.in_paid_period(now) {
        format!(
            "Your subscription will remain active until {}",
            stored.end_date.format("%Y-%m-%d")
        )
    } else {
        "Your subscription has expired".to_string()
    };

    Ok(Json(CancelResponse {
        message: "Subscription cancelled successfully".into(),
        subscription: view,
        note,
    }))
}

// ============================================================================
// Catalog, usage and features
// ============================================================================

/// Prices for one plan.
#[derive(Debug, Serialize)]
pub struct Pricing {
    /// Monthly price.
    pub monthly: i64,
    /// Annual price.
    pub annually: i64,
}

/// A purchasable plan.
#[derive(Debug, Serialize)]
pub struct PlanView {
    /// Display name.
    pub name: &'static str,
    /// Plan identifier.
    #[serde(rename = "type")]
    pub plan_type: PlanType,
    /// Prices per cycle.
    pub pricing: Pricing,
    /// Feature set.
    pub features: FeatureSet,
}

/// Plans response.
#[derive(Debug, Serialize)]
pub struct PlansResponse {
    /// Purchasable plans, cheapest first.
    pub plans: Vec<PlanView>,
}

/// List purchasable plans. Public.
pub async fn plans() -> Json<PlansResponse> {
    let plans = PlanType::PURCHASABLE
        .iter()
        .map(|plan| PlanView {
            name: plan.display_name(),
            plan_type: *plan,
            pricing: Pricing {
                monthly: price_for(plan.as_str(), BillingCycle::Monthly.as_str()),
                annually: price_for(plan.as_str(), BillingCycle::Annually.as_str()),
            },
            features: features_for(plan.as_str()),
        })
        .collect();

    Json(PlansResponse { plans })
}

/// Usage counters this month.
#[derive(Debug, Serialize)]
pub struct UsageView {
    /// Gated calculations run.
    pub calculations_this_month: u64,
    /// Box types submitted.
    pub boxes_used_this_month: u64,
    /// Start of the counting window.
    pub last_reset_date: DateTime<Utc>,
}

/// Box limits of the plan.
#[derive(Debug, Serialize)]
pub struct LimitsView {
    /// Box types per calculation.
    pub max_boxes: u32,
    /// No box limit.
    pub unlimited_boxes: bool,
}

/// Usage response.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Plan in force.
    pub plan_type: PlanType,
    /// Counters.
    pub usage: UsageView,
    /// Limits.
    pub limits: LimitsView,
}

/// Get this month's usage.
///
/// Counters from a previous month read as zero; they are reset on the next
/// gated request.
pub async fn usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UsageResponse>, ApiError> {
    let now = Utc::now();
    let subscription = load(&state, &auth)?;
    let stats = &subscription.usage;

    let usage = if same_month(now, stats.last_reset_date) {
        UsageView {
            calculations_this_month: stats.calculations_this_month,
            boxes_used_this_month: stats.boxes_used_this_month,
            last_reset_date: stats.last_reset_date,
        }
    } else {
        UsageView {
            calculations_this_month: 0,
            boxes_used_this_month: 0,
            last_reset_date: stats.last_reset_date,
        }
    };

    Ok(Json(UsageResponse {
        plan_type: subscription.plan,
        usage,
        limits: LimitsView {
            max_boxes: subscription.features.max_boxes,
            unlimited_boxes: subscription.features.unlimited_boxes,
        },
    }))
}

/// Feature check response.
#[derive(Debug, Serialize)]
pub struct FeatureCheckResponse {
    /// The feature.
    pub feature: Feature,
    /// Always true; refusals are `403`.
    pub allowed: bool,
    /// Plan in force.
    pub current_plan: PlanType,
}

/// Check one feature flag through the gate.
pub async fn check_feature(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(feature): Path<String>,
) -> Result<Json<FeatureCheckResponse>, ApiError> {
    let feature: Feature = feature.parse()?;
    let subscription = gate::require_access(state.store.as_ref(), &auth.user_id, Utc::now())?;
    gate::require_feature(&subscription, feature)?;

    Ok(Json(FeatureCheckResponse {
        feature,
        allowed: true,
        current_plan: subscription.plan,
    }))
}

// ============================================================================
// Admin
// ============================================================================

/// Apply-due response.
#[derive(Debug, Serialize)]
pub struct ApplyDueResponse {
    /// Subscriptions with a due change.
    pub checked: usize,
    /// Changes applied.
    pub applied: usize,
    /// Changes skipped because the record changed concurrently or failed.
    pub skipped: usize,
}

/// Apply every scheduled change whose date has arrived.
///
/// Target for the periodic trigger. Running it twice applies nothing the second time.
pub async fn apply_due_changes(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Result<Json<ApplyDueResponse>, ApiError> {
    let now = Utc::now();
    let due = state.store.list_due_scheduled_changes(now)?;

    let mut applied = 0;
    for subscription in &due {
        let result = subscription
            .apply_scheduled_change(now)
            .map_err(ApiError::from)
            .and_then(|next| {
                state
                    .store
                    .replace_subscription(&next, subscription.version)
                    .map_err(ApiError::from)
            });

        match result {
            Ok(stored) => {
                applied += 1;
                tracing::info!(
                    user_id = %stored.user_id,
                    plan = %stored.plan,
                    end_date = %stored.end_date,
                    "Scheduled plan change applied"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %subscription.user_id,
                    error = %e,
                    "Skipping scheduled plan change"
                );
            }
        }
    }

    tracing::info!(
        admin_id = %admin.admin_id,
        checked = due.len(),
        applied,
        "Applied due plan changes"
    );

    Ok(Json(ApplyDueResponse {
        checked: due.len(),
        applied,
        skipped: due.len() - applied,
    }))
}
