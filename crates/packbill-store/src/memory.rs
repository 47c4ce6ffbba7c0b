//! In-memory storage implementation.
//!
//! Everything lives behind one mutex, which makes every operation trivially atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use packbill_core::{Payment, PaymentId, PaymentPatch, Subscription, UserId};

use crate::error::{Result, StoreError};
use crate::ops;
use crate::{PaymentKey, Store};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<UserId, Subscription>,
    payments: HashMap<PaymentId, Payment>,
    by_order: HashMap<String, PaymentId>,
    by_gateway_id: HashMap<String, PaymentId>,
}

impl Inner {
    fn resolve(&self, key: &PaymentKey) -> Option<PaymentId> {
        match key {
            PaymentKey::Id(id) => self.payments.contains_key(id).then_some(*id),
            PaymentKey::Order(order_id) => self.by_order.get(order_id).copied(),
            PaymentKey::GatewayPayment(id) => self.by_gateway_id.get(id).copied(),
        }
    }

    fn put_payment(&mut self, payment: Payment) {
        if let Some(gateway_id) = &payment.gateway_payment_id {
            self.by_gateway_id.insert(gateway_id.clone(), payment.id);
        }
        self.payments.insert(payment.id, payment);
    }
}

/// Mutex-guarded in-memory storage.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(user_id).cloned())
    }

    fn insert_subscription(&self, subscription: &Subscription) -> Result<Subscription> {
        let mut inner = self.lock()?;
        if inner.subscriptions.contains_key(&subscription.user_id) {
            return Err(StoreError::DuplicateSubscription {
                user_id: subscription.user_id.to_string(),
            });
        }
        let stored = ops::next_version(subscription, None);
        inner
            .subscriptions
            .insert(stored.user_id, stored.clone());
        Ok(stored)
    }

    fn replace_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<Subscription> {
        let mut inner = self.lock()?;
        let current = inner
            .subscriptions
            .get(&subscription.user_id)
            .ok_or(StoreError::NotFound)?;
        ops::check_version(Some(current), Some(expected_version))?;

        let stored = ops::next_version(subscription, Some(expected_version));
        inner
            .subscriptions
            .insert(stored.user_id, stored.clone());
        Ok(stored)
    }

    fn list_due_scheduled_changes(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .filter(|sub| sub.has_due_change(now))
            .cloned()
            .collect())
    }

    fn record_usage(
        &self,
        user_id: &UserId,
        boxes: u64,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut inner = self.lock()?;
        let current = inner
            .subscriptions
            .get(user_id)
            .ok_or(StoreError::NotFound)?;
        let stored = ops::next_version(&current.with_usage(now, boxes), Some(current.version));
        inner.subscriptions.insert(*user_id, stored.clone());
        Ok(stored)
    }

    fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.by_order.contains_key(&payment.order_id) {
            return Err(StoreError::DuplicateOrder {
                order_id: payment.order_id.clone(),
            });
        }
        inner.by_order.insert(payment.order_id.clone(), payment.id);
        inner.put_payment(payment.clone());
        Ok(())
    }

    fn get_payment(&self, key: &PaymentKey) -> Result<Option<Payment>> {
        let inner = self.lock()?;
        Ok(inner
            .resolve(key)
            .and_then(|id| inner.payments.get(&id).cloned()))
    }

    fn update_payment(
        &self,
        key: &PaymentKey,
        patch: &PaymentPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let mut inner = self.lock()?;
        let Some(current) = inner
            .resolve(key)
            .and_then(|id| inner.payments.get(&id).cloned())
        else {
            return Ok(None);
        };

        let (payment, changed) = ops::patch_payment(current, patch, now)?;
        if changed {
            inner.put_payment(payment.clone());
        }
        Ok(Some(payment))
    }

    fn commit_activation(
        &self,
        payment_id: &PaymentId,
        subscription: &Subscription,
        expected_version: Option<u64>,
    ) -> Result<(Payment, Subscription)> {
        let mut inner = self.lock()?;
        let payment = inner
            .payments
            .get(payment_id)
            .ok_or(StoreError::NotFound)?;
        let current = inner.subscriptions.get(&subscription.user_id);

        let (payment, subscription) =
            ops::prepare_activation(payment, current, subscription, expected_version)?;

        inner.put_payment(payment.clone());
        inner
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok((payment, subscription))
    }

    fn claim_refund(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<Payment> {
        let mut inner = self.lock()?;
        let payment = inner
            .payments
            .get(payment_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let claimed = ops::claim_refund(payment, now)?;
        inner.put_payment(claimed.clone());
        Ok(claimed)
    }

    fn release_refund(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        let payment = inner
            .payments
            .get(payment_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let (payment, changed) = ops::release_refund(payment, now);
        if changed {
            inner.put_payment(payment);
        }
        Ok(())
    }

    fn commit_refund(
        &self,
        payment_id: &PaymentId,
        refund_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Payment, Option<Subscription>)> {
        let mut inner = self.lock()?;
        let payment = inner
            .payments
            .get(payment_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let current = inner.subscriptions.get(&payment.user_id).cloned();

        let write = ops::prepare_refund(payment, current, refund_id, now)?;
        if write.payment_changed {
            inner.put_payment(write.payment.clone());
        }
        if let (true, Some(sub)) = (write.subscription_changed, &write.subscription) {
            inner.subscriptions.insert(sub.user_id, sub.clone());
        }
        Ok((write.payment, write.subscription))
    }
}
