//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Subscription records, keyed by `user_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Payment ledger rows, keyed by `payment_id` (ULID).
    pub const PAYMENTS: &str = "payments";

    /// Index: gateway order id to `payment_id`. Enforces order uniqueness.
    pub const PAYMENTS_BY_ORDER: &str = "payments_by_order";

    /// Index: gateway payment id to `payment_id`.
    pub const PAYMENTS_BY_GATEWAY_ID: &str = "payments_by_gateway_id";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SUBSCRIPTIONS,
        cf::PAYMENTS,
        cf::PAYMENTS_BY_ORDER,
        cf::PAYMENTS_BY_GATEWAY_ID,
    ]
}
