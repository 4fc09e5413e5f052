//! In-memory subscription store, used by tests and single-process setups.

use crate::models::SubscriptionRecord;
use crate::store::SubscriptionStore;
use async_trait::async_trait;
use billing_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    subscriptions: BTreeMap<i64, SubscriptionRecord>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    inner: Mutex<Inner>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("subscription store poisoned")
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, record: &SubscriptionRecord) -> Result<i64, AppError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let subscription_id = inner.next_id;
        let mut record = record.clone();
        record.subscription_id = subscription_id;
        inner.subscriptions.insert(subscription_id, record);
        Ok(subscription_id)
    }

    async fn update(&self, record: &SubscriptionRecord) -> Result<(), AppError> {
        let mut inner = self.lock();
        if !inner.subscriptions.contains_key(&record.subscription_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} does not exist",
                record.subscription_id
            )));
        }
        inner
            .subscriptions
            .insert(record.subscription_id, record.clone());
        Ok(())
    }

    async fn fetch(&self, subscription_id: i64) -> Result<Option<SubscriptionRecord>, AppError> {
        Ok(self.lock().subscriptions.get(&subscription_id).cloned())
    }

    async fn find_by_parent_invoice(
        &self,
        parent_invoice_id: i64,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .find(|record| record.parent_invoice_id == parent_invoice_id)
            .cloned())
    }

    async fn delete(&self, subscription_id: i64) -> Result<bool, AppError> {
        Ok(self.lock().subscriptions.remove(&subscription_id).is_some())
    }
}
