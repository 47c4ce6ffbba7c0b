//! API handlers.

pub mod health;
pub mod packing;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;
