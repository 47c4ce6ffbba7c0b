//! Payment gateway webhook handler.
//!
//! Each event becomes one keyed field-level update of the ledger. Updates are
//! idempotent, and events that arrive out of lifecycle order (a late
//! `payment.authorized` after capture) are dropped rather than rejected, so
//! the gateway never retries them.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use packbill_core::{Payment, PaymentPatch, PaymentStatus};
use packbill_store::{PaymentKey, StoreError};

use crate::activation::activate_payment;
use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::gateway::types::{PaymentEntity, RefundEntity};
use crate::gateway::WebhookEvent;
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
}

/// Handle gateway webhooks.
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let webhook_secret = state
        .config
        .gateway_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            tracing::error!("Webhook secret not configured - rejecting webhook");
            ApiError::Gateway("webhook secret not configured".into())
        })?;

    let signature = headers
        .get("x-signature")
        .or_else(|| headers.get("x-razorpay-signature"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::SignatureMismatch("Missing webhook signature".into()))?;

    if !verify_signature(webhook_secret, &body, signature) {
        tracing::warn!("Invalid webhook signature");
        return Err(ApiError::SignatureMismatch("Invalid webhook signature".into()));
    }

    let event: WebhookEvent =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(event = %event.event, "Received gateway webhook");

    let now = Utc::now();
    let payment_entity = event.payload.payment.map(|w| w.entity);
    let refund_entity = event.payload.refund.map(|w| w.entity);

    match event.event.as_str() {
        "payment.authorized" => {
            let entity = require(payment_entity, "payment")?;
            let patch = PaymentPatch::status(PaymentStatus::Pending)
                .with_gateway_payment_id(&entity.id);
            apply(&state, locate(&state, &entity)?, &patch, now)?;
        }
        "payment.captured" => {
            let entity = require(payment_entity, "payment")?;
            let mut patch = PaymentPatch::succeeded(now).with_gateway_payment_id(&entity.id);
            if let Some(method) = &entity.method {
                patch = patch.with_method(method);
            }
            let updated = apply(&state, locate(&state, &entity)?, &patch, now)?;

            if state.config.activate_on_capture {
                if let Some(payment) = updated {
                    activate_captured(&state, &payment, now)?;
                }
            }
        }
        "payment.failed" => {
            let entity = require(payment_entity, "payment")?;
            let reason = entity
                .error_description
                .clone()
                .unwrap_or_else(|| "Payment failed".into());
            let key = match &entity.order_id {
                Some(order_id) => Some(PaymentKey::Order(order_id.clone())),
                None => locate(&state, &entity)?,
            };
            apply(&state, key, &PaymentPatch::failed(reason), now)?;
        }
        "refund.processed" => {
            let RefundEntity { id, payment_id } = require(refund_entity, "refund")?;
            let patch = PaymentPatch::status(PaymentStatus::Refunded).with_refund_id(id);
            apply(&state, Some(PaymentKey::GatewayPayment(payment_id)), &patch, now)?;
        }
        _ => {
            tracing::debug!(event = %event.event, "Unhandled gateway event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

fn require<T>(entity: Option<T>, kind: &str) -> Result<T, ApiError> {
    entity.ok_or_else(|| ApiError::BadRequest(format!("Missing {kind} entity")))
}

/// Key for a payment entity: its gateway id if we have seen it, else its order.
fn locate(state: &AppState, entity: &PaymentEntity) -> Result<Option<PaymentKey>, ApiError> {
    let by_gateway_id = PaymentKey::GatewayPayment(entity.id.clone());
    if state.store.get_payment(&by_gateway_id)?.is_some() {
        return Ok(Some(by_gateway_id));
    }
    Ok(entity.order_id.clone().map(PaymentKey::Order))
}

/// Apply a keyed patch. Unknown payments and out-of-order moves are logged and skipped.
fn apply(
    state: &AppState,
    key: Option<PaymentKey>,
    patch: &PaymentPatch,
    now: DateTime<Utc>,
) -> Result<Option<Payment>, ApiError> {
    let Some(key) = key else {
        tracing::debug!("Webhook entity matches no payment");
        return Ok(None);
    };

    match state.store.update_payment(&key, patch, now) {
        Ok(Some(payment)) => {
            tracing::info!(
                payment = %key,
                status = %payment.status,
                "Payment updated from webhook"
            );
            Ok(Some(payment))
        }
        Ok(None) => {
            tracing::debug!(payment = %key, "Webhook entity matches no payment");
            Ok(None)
        }
        Err(StoreError::InvalidTransition(e)) => {
            tracing::info!(payment = %key, error = %e, "Ignoring out-of-order webhook");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Activate a captured payment the client never verified.
fn activate_captured(
    state: &AppState,
    payment: &Payment,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if payment.status != PaymentStatus::Success || payment.subscription_id.is_some() {
        return Ok(());
    }

    match activate_payment(state.store.as_ref(), payment, now) {
        Ok(_) => Ok(()),
        Err(e @ (StoreError::AlreadyActivated { .. } | StoreError::VersionConflict { .. })) => {
            tracing::info!(
                payment_id = %payment.id,
                error = %e,
                "Capture activation lost to a concurrent writer"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
