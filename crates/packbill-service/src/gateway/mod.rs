//! Payment gateway integration.
//!
//! Orders, payment lookups and refunds go through [`PaymentGateway`]. The
//! production implementation is [`GatewayClient`]; tests substitute their own.

mod client;
pub mod types;

use async_trait::async_trait;

pub use client::GatewayClient;
pub use types::{
    CreateOrderRequest, GatewayPayment, Order, Refund, RefundRequest, WebhookEvent,
};

/// Gateway API errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed (includes timeouts).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway API returned an error.
    #[error("gateway API error ({status}): {code} - {description}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Gateway error code.
        code: String,
        /// Error description.
        description: String,
    },

    /// Gateway credentials are missing.
    #[error("payment gateway not configured")]
    NotConfigured,
}

/// The client side of the order/verify/refund protocol.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order the buyer will pay against.
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, GatewayError>;

    /// Look up a payment, e.g. for its method.
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError>;

    /// Refund a captured payment.
    async fn refund(&self, payment_id: &str, request: &RefundRequest)
        -> Result<Refund, GatewayError>;
}
