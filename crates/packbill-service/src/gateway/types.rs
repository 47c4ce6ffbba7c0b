//! Payment gateway API and webhook types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request body for creating an order.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in minor units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Our unique receipt token.
    pub receipt: String,
    /// Metadata echoed back on payments and webhooks.
    pub notes: BTreeMap<String, String>,
}

/// An order as returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Gateway order id.
    pub id: String,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Receipt token.
    #[serde(default)]
    pub receipt: Option<String>,
    /// Order status.
    #[serde(default)]
    pub status: Option<String>,
}

/// A payment as returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    /// Gateway payment id.
    pub id: String,
    /// Order the payment belongs to.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Payment status.
    #[serde(default)]
    pub status: Option<String>,
    /// Payment method (card, upi, netbanking, ...).
    #[serde(default)]
    pub method: Option<String>,
    /// Amount in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Request body for refunding a payment.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    /// Amount in minor units.
    pub amount: i64,
    /// Refund speed ("normal" or "optimum").
    pub speed: String,
    /// Metadata.
    pub notes: BTreeMap<String, String>,
}

/// A refund as returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    /// Gateway refund id.
    pub id: String,
    /// Refunded payment.
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Amount in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
    /// Refund status.
    #[serde(default)]
    pub status: Option<String>,
}

/// Error envelope returned by the gateway API.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorResponse {
    /// Error details.
    pub error: GatewayErrorBody,
}

/// Error details.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorBody {
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Webhooks
// ============================================================================

/// A webhook event: `{event, payload: {payment: {entity}} | {refund: {entity}}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event kind, e.g. `payment.captured`.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: WebhookPayload,
}

/// Entities carried by an event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    /// Payment entity, for `payment.*` events.
    #[serde(default)]
    pub payment: Option<EntityWrapper<PaymentEntity>>,
    /// Refund entity, for `refund.*` events.
    #[serde(default)]
    pub refund: Option<EntityWrapper<RefundEntity>>,
}

/// The `{entity: ...}` wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityWrapper<T> {
    /// The entity.
    pub entity: T,
}

/// Payment entity in a webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    /// Gateway payment id.
    pub id: String,
    /// Order id.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Payment method.
    #[serde(default)]
    pub method: Option<String>,
    /// Failure description, for `payment.failed`.
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Refund entity in a webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundEntity {
    /// Gateway refund id.
    pub id: String,
    /// Refunded payment.
    pub payment_id: String,
}
