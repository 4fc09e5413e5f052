//! Subscription persistence.

mod memory;
mod postgres;

use crate::models::SubscriptionRecord;
use async_trait::async_trait;
use billing_core::error::AppError;

pub use memory::InMemorySubscriptionStore;
pub use postgres::PgSubscriptionStore;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new record, returning its assigned id.
    async fn insert(&self, record: &SubscriptionRecord) -> Result<i64, AppError>;

    async fn update(&self, record: &SubscriptionRecord) -> Result<(), AppError>;

    async fn fetch(&self, subscription_id: i64) -> Result<Option<SubscriptionRecord>, AppError>;

    /// The subscription hanging off a parent invoice, if any.
    async fn find_by_parent_invoice(
        &self,
        parent_invoice_id: i64,
    ) -> Result<Option<SubscriptionRecord>, AppError>;

    async fn delete(&self, subscription_id: i64) -> Result<bool, AppError>;
}
