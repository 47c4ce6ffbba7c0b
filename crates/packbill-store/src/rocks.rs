//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//!
//! Reads go straight to the database. Every read-modify-write runs under a
//! single write lock and lands as one `WriteBatch`, so version checks and
//! index maintenance cannot interleave with another writer in this process.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use packbill_core::{Payment, PaymentId, PaymentPatch, Subscription, UserId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::ops;
use crate::schema::{all_column_families, cf};
use crate::{PaymentKey, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".to_string()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn index_lookup(&self, cf_name: &str, key: &[u8]) -> Result<Option<PaymentId>> {
        let cf = self.cf(cf_name)?;
        let Some(value) = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        keys::decode_payment_id(&value)
            .map(Some)
            .ok_or_else(|| StoreError::Serialization(format!("corrupt index entry in {cf_name}")))
    }

    fn resolve(&self, key: &PaymentKey) -> Result<Option<PaymentId>> {
        match key {
            PaymentKey::Id(id) => Ok(Some(*id)),
            PaymentKey::Order(order_id) => {
                self.index_lookup(cf::PAYMENTS_BY_ORDER, &keys::order_index_key(order_id))
            }
            PaymentKey::GatewayPayment(id) => {
                self.index_lookup(cf::PAYMENTS_BY_GATEWAY_ID, &keys::gateway_index_key(id))
            }
        }
    }

    fn load_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        self.get_value(cf::PAYMENTS, &keys::payment_key(payment_id))
    }

    /// Stage a payment row plus its gateway index entry.
    fn stage_payment(&self, batch: &mut WriteBatch, payment: &Payment) -> Result<()> {
        let cf_payments = self.cf(cf::PAYMENTS)?;
        batch.put_cf(&cf_payments, keys::payment_key(&payment.id), Self::serialize(payment)?);
        if let Some(gateway_id) = &payment.gateway_payment_id {
            let cf_gateway = self.cf(cf::PAYMENTS_BY_GATEWAY_ID)?;
            batch.put_cf(
                &cf_gateway,
                keys::gateway_index_key(gateway_id),
                keys::payment_key(&payment.id),
            );
        }
        Ok(())
    }

    fn stage_subscription(&self, batch: &mut WriteBatch, subscription: &Subscription) -> Result<()> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        batch.put_cf(
            &cf,
            keys::subscription_key(&subscription.user_id),
            Self::serialize(subscription)?,
        );
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_subscription(&mut batch, subscription)?;
        self.write(batch)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::subscription_key(user_id))
    }

    fn insert_subscription(&self, subscription: &Subscription) -> Result<Subscription> {
        let _guard = self.lock()?;
        if self.get_subscription(&subscription.user_id)?.is_some() {
            return Err(StoreError::DuplicateSubscription {
                user_id: subscription.user_id.to_string(),
            });
        }

        let stored = ops::next_version(subscription, None);
        self.put_subscription(&stored)?;
        Ok(stored)
    }

    fn replace_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<Subscription> {
        let _guard = self.lock()?;
        let current = self
            .get_subscription(&subscription.user_id)?
            .ok_or(StoreError::NotFound)?;
        ops::check_version(Some(&current), Some(expected_version))?;

        let stored = ops::next_version(subscription, Some(expected_version));
        self.put_subscription(&stored)?;
        Ok(stored)
    }

    fn list_due_scheduled_changes(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let mut due = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let subscription: Subscription = Self::deserialize(&value)?;
            if subscription.has_due_change(now) {
                due.push(subscription);
            }
        }
        Ok(due)
    }

    fn record_usage(
        &self,
        user_id: &UserId,
        boxes: u64,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let _guard = self.lock()?;
        let current = self.get_subscription(user_id)?.ok_or(StoreError::NotFound)?;
        let stored = ops::next_version(&current.with_usage(now, boxes), Some(current.version));
        self.put_subscription(&stored)?;
        Ok(stored)
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let _guard = self.lock()?;
        let order_key = keys::order_index_key(&payment.order_id);
        if self.index_lookup(cf::PAYMENTS_BY_ORDER, &order_key)?.is_some() {
            return Err(StoreError::DuplicateOrder {
                order_id: payment.order_id.clone(),
            });
        }

        let cf_by_order = self.cf(cf::PAYMENTS_BY_ORDER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_by_order, &order_key, keys::payment_key(&payment.id));
        self.stage_payment(&mut batch, payment)?;
        self.write(batch)
    }

    fn get_payment(&self, key: &PaymentKey) -> Result<Option<Payment>> {
        match self.resolve(key)? {
            Some(id) => self.load_payment(&id),
            None => Ok(None),
        }
    }

    fn update_payment(
        &self,
        key: &PaymentKey,
        patch: &PaymentPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let _guard = self.lock()?;
        let Some(current) = self.get_payment(key)? else {
            return Ok(None);
        };

        let (payment, changed) = ops::patch_payment(current, patch, now)?;
        if changed {
            let mut batch = WriteBatch::default();
            self.stage_payment(&mut batch, &payment)?;
            self.write(batch)?;
        }
        Ok(Some(payment))
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn commit_activation(
        &self,
        payment_id: &PaymentId,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> Result<(Payment, Subscription)> {
        let _guard = self.lock()?;
        let payment = self.load_payment(payment_id)?.ok_or(StoreError::NotFound)?;
        let current = self.get_subscription(&subscription.user_id)?;

        let (payment, subscription) =
            ops::prepare_activation(&payment, current.as_ref(), subscription, expected_version)?;

        // Write atomically
        let mut batch = WriteBatch::default();
        self.stage_payment(&mut batch, &payment)?;
        self.stage_subscription(&mut batch, &subscription)?;
        self.write(batch)?;

        Ok((payment, subscription))
    }

    fn claim_refund(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<Payment> {
        let _guard = self.lock()?;
        let payment = self.load_payment(payment_id)?.ok_or(StoreError::NotFound)?;
        let claimed = ops::claim_refund(payment, now)?;

        let mut batch = WriteBatch::default();
        self.stage_payment(&mut batch, &claimed)?;
        self.write(batch)?;
        Ok(claimed)
    }

    fn release_refund(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock()?;
        let payment = self.load_payment(payment_id)?.ok_or(StoreError::NotFound)?;
        let (payment, changed) = ops::release_refund(payment, now);
        if changed {
            let mut batch = WriteBatch::default();
            self.stage_payment(&mut batch, &payment)?;
            self.write(batch)?;
        }
        Ok(())
    }

    fn commit_refund(
        &self,
        payment_id: &PaymentId,
        refund_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Payment, Option<Subscription>)> {
        let _guard = self.lock()?;
        let payment = self.load_payment(payment_id)?.ok_or(StoreError::NotFound)?;
        let current = self.get_subscription(&payment.user_id)?;

        let write = ops::prepare_refund(payment, current, refund_id, now)?;

        let mut batch = WriteBatch::default();
        if write.payment_changed {
            self.stage_payment(&mut batch, &write.payment)?;
        }
        if let (true, Some(sub)) = (write.subscription_changed, &write.subscription) {
            self.stage_subscription(&mut batch, sub)?;
        }
        if !batch.is_empty() {
            self.write(batch)?;
        }

        Ok((write.payment, write.subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packbill_core::{
        activate, BillingCycle, PaymentDetails, PaymentStatus, PlanType, Purchase,
        SubscriptionStatus,
    };
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn new_payment(user_id: UserId, order_id: &str) -> Payment {
        Payment::new(
            user_id,
            order_id.to_string(),
            299,
            "INR".to_string(),
            PlanType::Pro,
            BillingCycle::Monthly,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn subscription_crud_with_versions() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let now = Utc::now();

        let stored = store
            .insert_subscription(&Subscription::new_trial(user_id, now, 14))
            .unwrap();
        assert_eq!(stored.version, 1);

        let retrieved = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(retrieved, stored);

        let cancelled = store
            .replace_subscription(&retrieved.cancel(now), retrieved.version)
            .unwrap();
        assert_eq!(cancelled.version, 2);
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);

        assert!(matches!(
            store.replace_subscription(&retrieved, retrieved.version),
            Err(StoreError::VersionConflict { .. })
        ));
        assert!(matches!(
            store.insert_subscription(&Subscription::new_trial(user_id, now, 14)),
            Err(StoreError::DuplicateSubscription { .. })
        ));
    }

    #[test]
    fn payment_lookup_by_every_key() {
        let (store, _dir) = create_test_store();
        let payment = new_payment(UserId::generate(), "order_k");
        store.insert_payment(&payment).unwrap();

        let by_order = store
            .get_payment(&PaymentKey::Order("order_k".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(by_order.id, payment.id);

        let now = Utc::now();
        store
            .update_payment(
                &PaymentKey::Order("order_k".to_string()),
                &PaymentPatch::status(PaymentStatus::Pending).with_gateway_payment_id("pay_k"),
                now,
            )
            .unwrap()
            .unwrap();

        let by_gateway = store
            .get_payment(&PaymentKey::GatewayPayment("pay_k".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(by_gateway.status, PaymentStatus::Pending);
        assert!(store
            .get_payment(&PaymentKey::Order("order_missing".to_string()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_order_rejected() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.insert_payment(&new_payment(user_id, "order_d")).unwrap();
        assert!(matches!(
            store.insert_payment(&new_payment(user_id, "order_d")),
            Err(StoreError::DuplicateOrder { .. })
        ));
    }

    #[test]
    fn captured_replay_is_byte_identical() {
        let (store, _dir) = create_test_store();
        let payment = new_payment(UserId::generate(), "order_c");
        store.insert_payment(&payment).unwrap();

        let t0 = Utc::now();
        let key = PaymentKey::Order("order_c".to_string());
        let patch = PaymentPatch::succeeded(t0).with_gateway_payment_id("pay_c");
        let first = store.update_payment(&key, &patch, t0).unwrap().unwrap();

        let t1 = t0 + chrono::Duration::seconds(10);
        let replay = PaymentPatch::succeeded(t1).with_gateway_payment_id("pay_c");
        let second = store.update_payment(&key, &replay, t1).unwrap().unwrap();
        assert_eq!(first, second);

        let raw_first = RocksStore::serialize(&first).unwrap();
        let stored = store.get_payment(&key).unwrap().unwrap();
        assert_eq!(RocksStore::serialize(&stored).unwrap(), raw_first);
    }

    #[test]
    fn activation_and_refund_are_atomic_pairs() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let payment = new_payment(user_id, "order_a");
        store.insert_payment(&payment).unwrap();
        let now = Utc::now();
        store
            .update_payment(
                &PaymentKey::Id(payment.id),
                &PaymentPatch::succeeded(now).with_gateway_payment_id("pay_a"),
                now,
            )
            .unwrap();

        let purchase = Purchase {
            user_id,
            plan: PlanType::Pro,
            billing_cycle: BillingCycle::Monthly,
            details: PaymentDetails {
                order_id: "order_a".to_string(),
                transaction_id: "pay_a".to_string(),
                amount: 299,
                currency: "INR".to_string(),
                payment_method: Some("upi".to_string()),
                payment_date: now,
            },
        };
        let (_, next) = activate(now, None, &purchase);
        let (linked, sub) = store.commit_activation(&payment.id, &next, None).unwrap();

        let reloaded = store.get_payment(&PaymentKey::Id(payment.id)).unwrap().unwrap();
        assert_eq!(reloaded.subscription_id, Some(sub.id));
        assert_eq!(reloaded, linked);

        let (refunded, cancelled) = store.commit_refund(&payment.id, "rfnd_a", now).unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(cancelled.unwrap().status, SubscriptionStatus::Cancelled);
        let stored_sub = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(stored_sub.status, SubscriptionStatus::Cancelled);
        assert!(!stored_sub.auto_renew);
    }

    #[test]
    fn refund_claim_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let payment = new_payment(UserId::generate(), "order_rc");
        let now = Utc::now();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.insert_payment(&payment).unwrap();
            store
                .update_payment(&PaymentKey::Id(payment.id), &PaymentPatch::succeeded(now), now)
                .unwrap();
            store.claim_refund(&payment.id, now).unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.claim_refund(&payment.id, now),
            Err(StoreError::RefundInProgress { .. })
        ));
        store.release_refund(&payment.id, now).unwrap();
        let reloaded = store.get_payment(&PaymentKey::Id(payment.id)).unwrap().unwrap();
        assert!(reloaded.refund_requested_at.is_none());
    }

    #[test]
    fn usage_counters_persist() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let now = Utc::now();
        store
            .insert_subscription(&Subscription::new_trial(user_id, now, 14))
            .unwrap();

        store.record_usage(&user_id, 4, now).unwrap();
        let after = store.record_usage(&user_id, 6, now).unwrap();
        assert_eq!(after.usage.calculations_this_month, 2);
        assert_eq!(after.usage.boxes_used_this_month, 10);
        assert!(matches!(
            store.record_usage(&UserId::generate(), 1, now),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let user_id = UserId::generate();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store
                .insert_subscription(&Subscription::new_trial(user_id, Utc::now(), 14))
                .unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store.get_subscription(&user_id).unwrap().is_some());
    }
}
