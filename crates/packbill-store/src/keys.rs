//! Key encoding utilities for `RocksDB`.

use packbill_core::{PaymentId, UserId};

/// Subscription key: the 16 UUID bytes of the owner.
#[must_use]
pub fn subscription_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Payment key: the 16 ULID bytes, so rows sort by creation time.
#[must_use]
pub fn payment_key(payment_id: &PaymentId) -> Vec<u8> {
    payment_id.to_bytes().to_vec()
}

/// Order index key.
#[must_use]
pub fn order_index_key(order_id: &str) -> Vec<u8> {
    order_id.as_bytes().to_vec()
}

/// Gateway payment index key.
#[must_use]
pub fn gateway_index_key(gateway_payment_id: &str) -> Vec<u8> {
    gateway_payment_id.as_bytes().to_vec()
}

/// Decode an index value back into a `PaymentId`.
///
/// Returns `None` unless the value is exactly 16 bytes.
#[must_use]
pub fn decode_payment_id(value: &[u8]) -> Option<PaymentId> {
    let bytes: [u8; 16] = value.try_into().ok()?;
    Some(PaymentId::from_bytes(bytes))
}
