//! Storage layer for packbill.
//!
//! This crate persists subscriptions and the payment ledger. Two backends
//! implement the same [`Store`] trait:
//!
//! - [`RocksStore`] (feature `rocksdb-backend`, on by default): `RocksDB` with
//!   CBOR values and column families
//! - [`MemoryStore`]: a mutex-guarded map, for tests and embedded use
//!
//! # Architecture
//!
//! The `RocksDB` backend uses the following column families:
//!
//! - `subscriptions`: one record per user, keyed by `user_id`
//! - `payments`: ledger rows, keyed by `payment_id` (ULID)
//! - `payments_by_order`: unique index from gateway order id to `payment_id`
//! - `payments_by_gateway_id`: index from gateway payment id to `payment_id`
//!
//! # Consistency
//!
//! Subscription writes are compare-and-swap on [`Subscription::version`].
//! Multi-record transitions ([`Store::commit_activation`], [`Store::commit_refund`])
//! are written as one batch.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "rocksdb-backend")]
//! # fn main() {
//! use chrono::Utc;
//! use packbill_core::{Subscription, UserId};
//! use packbill_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/packbill-db").unwrap();
//!
//! let user_id = UserId::generate();
//! let trial = Subscription::new_trial(user_id, Utc::now(), 14);
//! store.insert_subscription(&trial).unwrap();
//!
//! let current = store.get_subscription(&user_id).unwrap();
//! # }
//! # #[cfg(not(feature = "rocksdb-backend"))]
//! # fn main() {}
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
mod ops;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use packbill_core::{Payment, PaymentId, PaymentPatch, Subscription, UserId};

/// How to find a payment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentKey {
    /// Internal payment id.
    Id(PaymentId),
    /// Gateway order id.
    Order(String),
    /// Gateway payment id.
    GatewayPayment(String),
}

impl std::fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "payment {id}"),
            Self::Order(order_id) => write!(f, "order {order_id}"),
            Self::GatewayPayment(id) => write!(f, "gateway payment {id}"),
        }
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Get a user's subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Insert a new subscription. Returns the stored record (version 1).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateSubscription` if the user already has one.
    fn insert_subscription(&self, subscription: &Subscription) -> Result<Subscription>;

    /// Replace a subscription if its stored version is still `expected_version`.
    ///
    /// Returns the stored record with its version bumped.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user has no subscription.
    /// - `StoreError::VersionConflict` if another writer got there first.
    fn replace_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<Subscription>;

    /// List subscriptions whose scheduled change is due at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_due_scheduled_changes(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;

    /// Record one gated calculation against the user's monthly counters.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user has no subscription.
    fn record_usage(&self, user_id: &UserId, boxes: u64, now: DateTime<Utc>)
        -> Result<Subscription>;

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Insert a new ledger row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateOrder` if the order id is already recorded.
    fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// Find a payment.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment(&self, key: &PaymentKey) -> Result<Option<Payment>>;

    /// Apply a field-level patch to one payment.
    ///
    /// Returns `None` if no payment matches. A patch that changes nothing is not
    /// written, so replays leave the row byte-for-byte identical.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransition` if the status move is not allowed;
    /// the row is left untouched.
    fn update_payment(
        &self,
        key: &PaymentKey,
        patch: &PaymentPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Write an activated (or scheduled) subscription and link the payment to it,
    /// atomically.
    ///
    /// `expected_version` is `None` when no subscription existed at decision time.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the payment doesn't exist.
    /// - `StoreError::AlreadyActivated` if the payment is already linked.
    /// - `StoreError::InvalidTransition` if the payment is not successful.
    /// - `StoreError::VersionConflict` if the subscription changed underneath.
    fn commit_activation(
        &self,
        payment_id: &PaymentId,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> Result<(Payment, Subscription)>;

    /// Claim a successful payment for a gateway refund call.
    ///
    /// Only one claim can be outstanding at a time; callers hold it across the
    /// gateway call and either commit or release it.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the payment doesn't exist.
    /// - `StoreError::InvalidTransition` unless the payment is successful.
    /// - `StoreError::RefundInProgress` if another claim is still live.
    fn claim_refund(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<Payment>;

    /// Release a refund claim after the gateway refused the refund.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the payment doesn't exist.
    fn release_refund(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<()>;

    /// Mark a payment refunded and cancel its linked subscription, atomically.
    ///
    /// Calling it again on a refunded payment changes nothing.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the payment doesn't exist.
    /// - `StoreError::InvalidTransition` if the payment was never successful.
    fn commit_refund(
        &self,
        payment_id: &PaymentId,
        refund_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Payment, Option<Subscription>)>;
}
