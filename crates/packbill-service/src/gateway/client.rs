//! Payment gateway REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::types::{
    CreateOrderRequest, GatewayErrorResponse, GatewayPayment, Order, Refund, RefundRequest,
};
use super::{GatewayError, PaymentGateway};

/// Gateway API client authenticating with key id and secret.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl GatewayClient {
    /// Create a new gateway client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.razorpay.com/v1`
    /// * `key_id` - API key id
    /// * `key_secret` - API key secret
    /// * `timeout` - Bound on every request
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<GatewayErrorResponse, _> = response.json().await;

        match error_body {
            Ok(body) => Err(GatewayError::Api {
                status: status.as_u16(),
                code: body.error.code.unwrap_or_else(|| "unknown".to_string()),
                description: body
                    .error
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            }),
            Err(_) => Err(GatewayError::Api {
                status: status.as_u16(),
                code: "unknown".to_string(),
                description: format!("HTTP {status}"),
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, GatewayError> {
        tracing::debug!(
            amount = request.amount,
            currency = %request.currency,
            receipt = %request.receipt,
            "Creating gateway order"
        );

        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        let response = self
            .client
            .get(format!("{}/payments/{}", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn refund(
        &self,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<Refund, GatewayError> {
        tracing::debug!(payment_id = %payment_id, amount = request.amount, "Requesting refund");

        let response = self
            .client
            .post(format!("{}/payments/{}/refund", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
