//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, packing, payments, subscriptions, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent packing calculations.
/// Each one holds a child process, so this is kept well below the API limit.
const PACKING_MAX_CONCURRENT_REQUESTS: usize = 8;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Liveness
/// - `GET /subscription/plans` - Plan catalog
///
/// ## Subscriptions (JWT auth)
/// - `GET /subscription/current` - Current subscription and pending change
/// - `POST /subscription/create-trial` - Start the trial
/// - `POST /subscription/change-plan` - Schedule a plan change at period end
/// - `POST /subscription/cancel-scheduled-change` - Drop the pending change
/// - `POST /subscription/apply-scheduled-change` - Apply a due change
/// - `POST /subscription/cancel` - Cancel
/// - `GET /subscription/usage` - Monthly usage and limits
/// - `GET /subscription/features/:feature` - Check one feature flag
///
/// ## Payments (JWT auth)
/// - `POST /payment/create-order` - Create a gateway order
/// - `POST /payment/verify-payment` - Verify checkout and activate
/// - `POST /payment/payment-failed` - Record a failed checkout
/// - `POST /payment/refund/:id` - Refund a successful payment
///
/// ## Packing (JWT auth, plan gated)
/// - `POST /track/calculate` - Run a packing calculation
///
/// ## Admin (admin key)
/// - `POST /admin/subscriptions/apply-due` - Apply every due scheduled change
///
/// ## Webhooks (Signature verification)
/// - `POST /payment/webhook` - Gateway webhooks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let subscription_routes = Router::new()
        .route("/current", get(subscriptions::current))
        .route("/create-trial", post(subscriptions::create_trial))
        .route("/change-plan", post(subscriptions::change_plan))
        .route(
            "/cancel-scheduled-change",
            post(subscriptions::cancel_scheduled_change),
        )
        .route(
            "/apply-scheduled-change",
            post(subscriptions::apply_scheduled_change),
        )
        .route("/cancel", post(subscriptions::cancel))
        .route("/plans", get(subscriptions::plans))
        .route("/usage", get(subscriptions::usage))
        .route("/features/:feature", get(subscriptions::check_feature));

    let payment_routes = Router::new()
        .route("/create-order", post(payments::create_order))
        .route("/verify-payment", post(payments::verify_payment))
        .route("/payment-failed", post(payments::payment_failed))
        .route("/refund/:id", post(payments::refund_payment));

    // Packing spawns a process per request, so it gets its own tighter limit.
    let packing_routes = Router::new()
        .route("/calculate", post(packing::calculate))
        .layer(ConcurrencyLimitLayer::new(PACKING_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .nest("/subscription", subscription_routes)
        .nest("/payment", payment_routes)
        .nest("/track", packing_routes)
        .route(
            "/admin/subscriptions/apply-due",
            post(subscriptions::apply_due_changes),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // Webhooks (no rate limit - controlled by the gateway)
        .route("/payment/webhook", post(webhooks::gateway_webhook))
        .merge(api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
