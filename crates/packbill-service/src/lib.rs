//! Packbill HTTP API Service.
//!
//! This crate provides the HTTP API for packbill, including:
//!
//! - Trials, plan changes and cancellation
//! - Gateway orders, payment verification and refunds
//! - Gateway webhook reconciliation
//! - The plan-gated packing calculation
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **JWT bearer tokens** - For end-user requests
//! 2. **Admin API key** - For the periodic scheduled-change trigger

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for consistency

pub mod activation;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use gateway::{GatewayClient, GatewayError, PaymentGateway};
pub use routes::create_router;
pub use state::AppState;
