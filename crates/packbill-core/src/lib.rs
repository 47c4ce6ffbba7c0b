//! Core types for packbill.
//!
//! This crate provides the domain model behind the packbill service, with no I/O:
//!
//! - **Identifiers**: `UserId`, `SubscriptionId`, `PaymentId`
//! - **Plans**: `PlanType`, `BillingCycle`, `FeatureSet`, `Feature`
//! - **Subscriptions**: `Subscription`, `ScheduledChange`, `Activation`, `decide`
//! - **Payments**: `Payment`, `PaymentStatus`, `PaymentPatch`
//! - **Usage**: `UsageStats`
//!
//! # Amounts
//!
//! Prices and payment amounts are whole currency units (`i64`). The gateway
//! receives minor units, see [`Payment::amount_minor`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod calendar;
pub mod error;
pub mod ids;
pub mod payment;
pub mod plan;
pub mod subscription;
pub mod usage;

pub use calendar::{days_remaining, days_until};
pub use error::{BillingError, Result};
pub use ids::{IdError, PaymentId, SubscriptionId, UserId};
pub use payment::{Payment, PaymentPatch, PaymentStatus};
pub use plan::{features_for, price_for, BillingCycle, Feature, FeatureSet, PlanType};
pub use subscription::{
    activate, decide, Activation, PaymentDetails, Purchase, ScheduledChange, Subscription,
    SubscriptionStatus,
};
pub use usage::UsageStats;
