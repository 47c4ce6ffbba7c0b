//! Payment handlers: order creation, verification, client-reported failure and refunds.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packbill_core::{
    days_until, price_for, BillingCycle, FeatureSet, Payment, PaymentId, PaymentPatch,
    PaymentStatus, PlanType, Subscription, SubscriptionStatus,
};
use packbill_store::{PaymentKey, StoreError};

use crate::activation::activate_payment;
use crate::auth::AuthUser;
use crate::crypto::{payment_signature_payload, verify_signature};
use crate::error::ApiError;
use crate::gateway::{CreateOrderRequest, PaymentGateway, RefundRequest};
use crate::handlers::subscriptions::ScheduledChangeView;
use crate::state::AppState;

fn gateway(state: &AppState) -> Result<&dyn PaymentGateway, ApiError> {
    state
        .gateway
        .as_deref()
        .ok_or_else(|| ApiError::Gateway("payment gateway not configured".into()))
}

/// Find a payment by order id, hiding other users' payments.
fn owned_payment(
    state: &AppState,
    key: &PaymentKey,
    auth: &AuthUser,
) -> Result<Option<Payment>, ApiError> {
    Ok(state
        .store
        .get_payment(key)?
        .filter(|payment| payment.user_id == auth.user_id))
}

// ============================================================================
// Create order
// ============================================================================

/// Create order request.
#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    /// Plan to buy.
    pub plan_type: String,
    /// Cycle to buy (default: monthly).
    #[serde(default)]
    pub billing_cycle: Option<String>,
}

/// Create order response.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    /// Always true.
    pub success: bool,
    /// Gateway order id the checkout pays against.
    pub order_id: String,
    /// Amount in whole currency units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Public gateway key for the checkout widget.
    pub key_id: Option<String>,
    /// Internal payment id.
    pub payment_id: String,
    /// Plan being bought.
    pub plan_type: PlanType,
    /// Cycle being bought.
    pub billing_cycle: BillingCycle,
}

/// Create a gateway order and its ledger row.
///
/// The row is written only after the gateway accepted the order.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<CreateOrderResponse>, ApiError> {
    let plan = PlanType::parse_purchasable(&body.plan_type)
        .map_err(|_| ApiError::BadRequest("Invalid plan type".into()))?;
    let billing_cycle = match body.billing_cycle.as_deref() {
        Some(cycle) => cycle.parse::<BillingCycle>()?,
        None => BillingCycle::default(),
    };

    let amount = price_for(plan.as_str(), billing_cycle.as_str());
    if amount <= 0 {
        return Err(ApiError::BadRequest("Invalid pricing configuration".into()));
    }

    let gateway = gateway(&state)?;
    let currency = state.config.currency.clone();

    let mut notes = BTreeMap::new();
    notes.insert("user_id".to_string(), auth.user_id.to_string());
    notes.insert("plan_type".to_string(), plan.to_string());
    notes.insert("billing_cycle".to_string(), billing_cycle.to_string());

    let order = gateway
        .create_order(&CreateOrderRequest {
            amount: amount.saturating_mul(100),
            currency: currency.clone(),
            receipt: format!("rcpt_{}", uuid::Uuid::new_v4().simple()),
            notes,
        })
        .await?;

    let payment = Payment::new(
        auth.user_id,
        order.id.clone(),
        amount,
        currency.clone(),
        plan,
        billing_cycle,
        Utc::now(),
    )?;
    state.store.insert_payment(&payment)?;

    tracing::info!(
        user_id = %auth.user_id,
        order_id = %order.id,
        payment_id = %payment.id,
        plan = %plan,
        billing_cycle = %billing_cycle,
        amount,
        "Order created"
    );

    Ok(Json(CreateOrderResponse {
        success: true,
        order_id: order.id,
        amount,
        currency,
        key_id: state.config.gateway_key_id.clone(),
        payment_id: payment.id.to_string(),
        plan_type: plan,
        billing_cycle,
    }))
}

// ============================================================================
// Verify
// ============================================================================

/// Verify payment request, as posted by the checkout callback.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentBody {
    /// Gateway order id.
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    /// Gateway payment id.
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    /// Gateway signature over `order_id|payment_id`.
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
    /// Plan the client believes it bought.
    #[serde(default)]
    pub plan_type: Option<String>,
    /// Cycle the client believes it bought.
    #[serde(default)]
    pub billing_cycle: Option<String>,
}

/// Payment part of the verify response.
#[derive(Debug, Serialize)]
pub struct VerifiedPayment {
    /// Internal payment id.
    pub id: String,
    /// Amount in whole currency units.
    pub amount: i64,
    /// Ledger status.
    pub status: PaymentStatus,
    /// Gateway payment id.
    pub payment_id: String,
}

/// Subscription part of the verify response.
#[derive(Debug, Serialize)]
pub struct VerifiedSubscription {
    /// Subscription id.
    pub id: String,
    /// Plan in force.
    pub plan: PlanType,
    /// Stored status.
    pub status: SubscriptionStatus,
    /// Cycle in force.
    pub billing_cycle: BillingCycle,
    /// Period start.
    pub start_date: DateTime<Utc>,
    /// Period end.
    pub end_date: DateTime<Utc>,
    /// Feature snapshot.
    pub features: FeatureSet,
}

impl From<&Subscription> for VerifiedSubscription {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            plan: sub.plan,
            status: sub.status,
            billing_cycle: sub.billing_cycle,
            start_date: sub.start_date,
            end_date: sub.end_date,
            features: sub.features,
        }
    }
}

/// The plan that stays in force while a purchase waits.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPlanInfo {
    /// Plan in force.
    pub plan: PlanType,
    /// When it ends.
    pub ends_on: DateTime<Utc>,
    /// Whole days until then.
    pub days_remaining: i64,
}

/// Verify payment response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    /// Always true; failures are error responses.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// The purchase was queued behind the current period.
    pub plan_change_scheduled: bool,
    /// The purchase took effect now.
    pub immediate: bool,
    /// The payment.
    pub payment: VerifiedPayment,
    /// The subscription after the purchase.
    pub subscription: VerifiedSubscription,
    /// The queued change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_change: Option<ScheduledChangeView>,
    /// The plan in force until the queued change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_plan_info: Option<CurrentPlanInfo>,
}

/// Best-effort lookup of the payment method; failures are logged and dropped.
async fn fetch_payment_method(state: &AppState, gateway_payment_id: &str) -> Option<String> {
    let gateway = state.gateway.as_ref()?;
    match gateway.fetch_payment(gateway_payment_id).await {
        Ok(payment) => payment.method,
        Err(e) => {
            tracing::warn!(
                payment_id = %gateway_payment_id,
                error = %e,
                "Could not fetch payment method"
            );
            None
        }
    }
}

/// Verify a completed checkout and apply the purchase.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<VerifyPaymentBody>,
) -> Result<Json<VerifyPaymentResponse>, ApiError> {
    let key = PaymentKey::Order(body.order_id.clone());
    let payment = owned_payment(&state, &key, &auth)?
        .ok_or_else(|| ApiError::NotFound("Payment record not found".into()))?;

    // The ledger row is authoritative; a client claiming another plan is refused.
    if let Some(claimed) = body.plan_type.as_deref() {
        if claimed.parse::<PlanType>().ok() != Some(payment.plan) {
            return Err(ApiError::BadRequest(format!(
                "Plan mismatch: order is for {}",
                payment.plan
            )));
        }
    }
    if let Some(claimed) = body.billing_cycle.as_deref() {
        if claimed.parse::<BillingCycle>().ok() != Some(payment.billing_cycle) {
            return Err(ApiError::BadRequest(format!(
                "Billing cycle mismatch: order is for {}",
                payment.billing_cycle
            )));
        }
    }

    let secret = state
        .config
        .gateway_key_secret
        .as_deref()
        .ok_or_else(|| ApiError::Gateway("payment gateway not configured".into()))?;

    let now = Utc::now();
    let message = payment_signature_payload(&body.order_id, &body.payment_id);
    if !verify_signature(secret, message.as_bytes(), &body.signature) {
        tracing::warn!(
            user_id = %auth.user_id,
            order_id = %body.order_id,
            "Payment signature mismatch"
        );
        if payment.status.can_transition_to(PaymentStatus::Failed) {
            state.store.update_payment(
                &key,
                &PaymentPatch::failed("Payment signature verification failed"),
                now,
            )?;
        }
        return Err(ApiError::SignatureMismatch(
            "Payment verification failed - Invalid signature".into(),
        ));
    }

    if payment.subscription_id.is_some() {
        return already_verified(&state, &payment, body.payment_id, now).map(Json);
    }

    let mut patch = PaymentPatch::succeeded(now)
        .with_gateway_payment_id(&body.payment_id)
        .with_signature(&body.signature);
    if let Some(method) = fetch_payment_method(&state, &body.payment_id).await {
        patch = patch.with_method(method);
    }
    let payment = state
        .store
        .update_payment(&key, &patch, now)?
        .ok_or_else(|| ApiError::NotFound("Payment record not found".into()))?;

    tracing::info!(
        user_id = %auth.user_id,
        order_id = %payment.order_id,
        payment_id = %body.payment_id,
        "Payment verified"
    );

    let (activation, payment, subscription) =
        match activate_payment(state.store.as_ref(), &payment, now) {
            Ok(applied) => applied,
            Err(StoreError::AlreadyActivated { .. }) => {
                // The capture webhook linked it between our read and commit.
                let linked = state
                    .store
                    .get_payment(&PaymentKey::Id(payment.id))?
                    .ok_or_else(|| ApiError::NotFound("Payment record not found".into()))?;
                return already_verified(&state, &linked, body.payment_id, now).map(Json);
            }
            Err(e) => return Err(e.into()),
        };

    let scheduled = !activation.is_immediate();
    let message = if scheduled {
        None
    } else {
        Some("Payment verified and subscription activated successfully!".to_string())
    };
    Ok(Json(verify_response(
        &payment,
        &subscription,
        scheduled,
        message,
        body.payment_id,
        now,
    )))
}

/// Respond to a verify for a payment that is already applied.
///
/// Nothing is written; the response describes the subscription as it stands.
fn already_verified(
    state: &AppState,
    payment: &Payment,
    gateway_payment_id: String,
    now: DateTime<Utc>,
) -> Result<VerifyPaymentResponse, ApiError> {
    let subscription = state
        .store
        .get_subscription(&payment.user_id)?
        .ok_or_else(|| ApiError::NotFound("No subscription found".into()))?;

    let scheduled = subscription
        .scheduled_change
        .as_ref()
        .is_some_and(|change| change.next_plan == payment.plan)
        && subscription
            .payment_details
            .as_ref()
            .is_some_and(|details| details.order_id == payment.order_id);

    tracing::info!(
        user_id = %payment.user_id,
        payment_id = %payment.id,
        "Verify replayed for applied payment"
    );

    Ok(verify_response(
        payment,
        &subscription,
        scheduled,
        Some("Payment already verified".to_string()),
        gateway_payment_id,
        now,
    ))
}

fn verify_response(
    payment: &Payment,
    subscription: &Subscription,
    scheduled: bool,
    message: Option<String>,
    gateway_payment_id: String,
    now: DateTime<Utc>,
) -> VerifyPaymentResponse {
    let scheduled_change = if scheduled {
        ScheduledChangeView::for_subscription(subscription, now)
    } else {
        None
    };
    let message = match (message, &scheduled_change) {
        (Some(message), _) => message,
        (None, Some(change)) => format!(
            "Your {} plan is scheduled to start on {}",
            payment.plan,
            change.starts_on.format("%Y-%m-%d")
        ),
        (None, None) => "Payment verified".to_string(),
    };

    VerifyPaymentResponse {
        success: true,
        message,
        plan_change_scheduled: scheduled,
        immediate: !scheduled,
        payment: VerifiedPayment {
            id: payment.id.to_string(),
            amount: payment.amount,
            status: payment.status,
            payment_id: gateway_payment_id,
        },
        current_plan_info: scheduled.then(|| CurrentPlanInfo {
            plan: subscription.plan,
            ends_on: subscription.end_date,
            days_remaining: days_until(now, subscription.end_date),
        }),
        subscription: VerifiedSubscription::from(subscription),
        scheduled_change,
    }
}

// ============================================================================
// Client-reported failure
// ============================================================================

/// Gateway error object forwarded by the checkout.
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutError {
    /// Failure description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Payment failed request.
#[derive(Debug, Deserialize)]
pub struct PaymentFailedBody {
    /// Gateway order id.
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    /// What the checkout reported.
    #[serde(default)]
    pub error: Option<CheckoutError>,
}

/// Payment failed response.
#[derive(Debug, Serialize)]
pub struct PaymentFailedResponse {
    /// Always false.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// The reported failure.
    pub error: String,
}

/// Record a checkout failure reported by the client.
pub async fn payment_failed(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PaymentFailedBody>,
) -> Result<Json<PaymentFailedResponse>, ApiError> {
    let description = body.error.and_then(|e| e.description);
    let key = PaymentKey::Order(body.order_id.clone());

    if owned_payment(&state, &key, &auth)?.is_some() {
        let reason = description.clone().unwrap_or_else(|| "Payment failed".into());
        match state
            .store
            .update_payment(&key, &PaymentPatch::failed(reason), Utc::now())
        {
            Ok(_) => {
                tracing::info!(
                    user_id = %auth.user_id,
                    order_id = %body.order_id,
                    "Payment marked failed"
                );
            }
            Err(StoreError::InvalidTransition(e)) => {
                tracing::warn!(order_id = %body.order_id, error = %e, "Ignoring failure report");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(PaymentFailedResponse {
        success: false,
        message: "Payment failed".into(),
        error: description.unwrap_or_else(|| "Payment was not completed".into()),
    }))
}

// ============================================================================
// Refund
// ============================================================================

/// Refund request.
#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    /// Reason passed to the gateway.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Refund response.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// Always true.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// Gateway refund id.
    pub refund_id: String,
    /// Amount refunded in whole currency units.
    pub amount: i64,
    /// Whether a linked subscription was cancelled.
    pub subscription_cancelled: bool,
}

/// Refund one of the caller's successful payments and cancel what it paid for.
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    body: Option<Json<RefundBody>>,
) -> Result<Json<RefundResponse>, ApiError> {
    let payment_id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid payment ID".into()))?;

    let payment = owned_payment(&state, &PaymentKey::Id(payment_id), &auth)?
        .ok_or_else(|| ApiError::NotFound("Payment not found".into()))?;

    if payment.status != PaymentStatus::Success {
        return Err(ApiError::BadRequest(
            "Only successful payments can be refunded".into(),
        ));
    }
    let gateway_payment_id = payment
        .gateway_payment_id
        .as_deref()
        .ok_or_else(|| ApiError::Internal(format!("payment {} has no gateway id", payment.id)))?;

    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "Customer requested refund".into());
    let mut notes = BTreeMap::new();
    notes.insert("reason".to_string(), reason);
    let gateway = gateway(&state)?;

    // One gateway refund call per payment at a time.
    state.store.claim_refund(&payment.id, Utc::now())?;

    let refund = match gateway
        .refund(
            gateway_payment_id,
            &RefundRequest {
                amount: payment.amount_minor(),
                speed: "normal".into(),
                notes,
            },
        )
        .await
    {
        Ok(refund) => refund,
        Err(e) => {
            if let Err(release_err) = state.store.release_refund(&payment.id, Utc::now()) {
                tracing::warn!(
                    payment_id = %payment.id,
                    error = %release_err,
                    "Could not release refund claim"
                );
            }
            return Err(e.into());
        }
    };

    let (payment, subscription) = state
        .store
        .commit_refund(&payment.id, &refund.id, Utc::now())?;

    tracing::info!(
        user_id = %auth.user_id,
        payment_id = %payment.id,
        refund_id = %refund.id,
        subscription_cancelled = subscription.is_some(),
        "Payment refunded"
    );

    Ok(Json(RefundResponse {
        success: true,
        message: "Refund processed successfully".into(),
        refund_id: refund.id,
        amount: payment.amount,
        subscription_cancelled: subscription.is_some(),
    }))
}
