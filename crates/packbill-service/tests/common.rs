//! Common test utilities for packbill integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::HeaderValue;
use axum::Router;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use packbill_core::{
    BillingCycle, PaymentDetails, PlanType, Purchase, Subscription, UserId,
};
use packbill_service::auth::JwtClaims;
use packbill_service::crypto::{hmac_sha256_hex, payment_signature_payload};
use packbill_service::gateway::{
    CreateOrderRequest, GatewayPayment, Order, PaymentGateway, Refund, RefundRequest,
};
use packbill_service::{create_router, AppState, GatewayError, ServiceConfig};
use packbill_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const KEY_SECRET: &str = "test-key-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const ADMIN_KEY: &str = "test-admin-key";

/// In-process gateway that hands out sequential ids and records refunds.
///
/// Each call can be switched to fail with a gateway API error.
#[derive(Default)]
pub struct FakeGateway {
    next_id: AtomicU64,
    /// Refunds issued, as (gateway payment id, amount in minor units).
    pub refunds: Mutex<Vec<(String, i64)>>,
    /// Order ids the gateway refused.
    pub refused_orders: Mutex<Vec<String>>,
    /// Method reported by `fetch_payment`.
    pub method: Option<String>,
    /// Refuse `create_order`.
    pub fail_orders: AtomicBool,
    /// Refuse `fetch_payment`.
    pub fail_fetch: AtomicBool,
    /// Refuse `refund`.
    pub fail_refunds: AtomicBool,
}

impl FakeGateway {
    fn next(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn refused(code: &str) -> GatewayError {
        GatewayError::Api {
            status: 502,
            code: code.into(),
            description: "gateway unavailable".into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, GatewayError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            self.refused_orders.lock().unwrap().push(self.next("order"));
            return Err(Self::refused("BAD_GATEWAY"));
        }
        Ok(Order {
            id: self.next("order"),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: Some("created".into()),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::refused("BAD_GATEWAY"));
        }
        Ok(GatewayPayment {
            id: payment_id.to_string(),
            order_id: None,
            status: Some("captured".into()),
            method: self.method.clone(),
            amount: None,
        })
    }

    async fn refund(
        &self,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<Refund, GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(Self::refused("BAD_REQUEST_ERROR"));
        }
        self.refunds
            .lock()
            .unwrap()
            .push((payment_id.to_string(), request.amount));
        Ok(Refund {
            id: self.next("rfnd"),
            payment_id: Some(payment_id.to_string()),
            amount: Some(request.amount),
            status: Some("processed".into()),
        })
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for seeding and inspection.
    pub store: Arc<MemoryStore>,
    /// The gateway behind the server.
    pub gateway: Arc<FakeGateway>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

/// Configuration used by every harness unless overridden.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        jwt_secret: JWT_SECRET.into(),
        admin_api_key: Some(ADMIN_KEY.into()),
        gateway_key_id: Some("rzp_test_key".into()),
        gateway_key_secret: Some(KEY_SECRET.into()),
        gateway_webhook_secret: Some(WEBHOOK_SECRET.into()),
        cors_origins: vec!["*".into()],
        ..ServiceConfig::default()
    }
}

impl TestHarness {
    /// Create a new test harness with an empty store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway {
            method: Some("card".into()),
            ..FakeGateway::default()
        });

        let state = AppState::with_gateway(
            store.clone(),
            config,
            Some(gateway.clone() as Arc<dyn PaymentGateway>),
        );
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            gateway,
            test_user_id: UserId::generate(),
        }
    }

    /// Authorization header for the test user.
    pub fn user_auth_header(&self) -> HeaderValue {
        bearer(&self.test_user_id)
    }

    /// Authorization header for some other user (for testing isolation).
    pub fn other_user_auth_header() -> HeaderValue {
        bearer(&UserId::generate())
    }

    /// Seed an active paid subscription for the test user ending in `days_left` days.
    pub fn seed_active(&self, plan: PlanType, days_left: i64) -> Subscription {
        let now = Utc::now();
        let mut sub = Subscription::new_active(
            now - Duration::days(30 - days_left),
            &Purchase {
                user_id: self.test_user_id,
                plan,
                billing_cycle: BillingCycle::Monthly,
                details: PaymentDetails {
                    order_id: "order_seed".into(),
                    transaction_id: "pay_seed".into(),
                    amount: plan.price(BillingCycle::Monthly),
                    currency: "INR".into(),
                    payment_method: None,
                    payment_date: now,
                },
            },
        );
        sub.end_date = now + Duration::days(days_left);
        self.store
            .insert_subscription(&sub)
            .expect("Failed to seed subscription")
    }

    /// Current stored subscription of the test user.
    pub fn subscription(&self) -> Option<Subscription> {
        self.store
            .get_subscription(&self.test_user_id)
            .expect("Failed to read subscription")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a bearer token for `user_id`.
pub fn bearer(user_id: &UserId) -> HeaderValue {
    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: Some(now),
        role: None,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode token");
    HeaderValue::from_str(&format!("Bearer {token}")).expect("Invalid header value")
}

/// Signature the checkout would post for a completed payment.
pub fn checkout_signature(order_id: &str, payment_id: &str) -> String {
    hmac_sha256_hex(
        KEY_SECRET,
        payment_signature_payload(order_id, payment_id).as_bytes(),
    )
}

/// Signature header value for a webhook body.
pub fn webhook_signature(body: &[u8]) -> HeaderValue {
    HeaderValue::from_str(&hmac_sha256_hex(WEBHOOK_SECRET, body)).expect("Invalid header value")
}
