//! Invoice persistence.
//!
//! The engine only ever speaks to [`InvoiceStore`]: an opaque record store
//! keyed by integer id with secondary lookups by key token and number.

mod memory;
mod postgres;

use crate::models::{InvoiceNote, InvoiceRecord};
use async_trait::async_trait;
use billing_core::error::AppError;

pub use memory::InMemoryInvoiceStore;
pub use postgres::PgInvoiceStore;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Insert a new record, returning its assigned id.
    async fn insert(&self, record: &InvoiceRecord) -> Result<i64, AppError>;

    async fn update(&self, record: &InvoiceRecord) -> Result<(), AppError>;

    async fn fetch(&self, invoice_id: i64) -> Result<Option<InvoiceRecord>, AppError>;

    async fn find_by_key(&self, invoice_key: &str) -> Result<Option<InvoiceRecord>, AppError>;

    async fn find_by_number(&self, invoice_number: &str)
        -> Result<Option<InvoiceRecord>, AppError>;

    async fn delete(&self, invoice_id: i64) -> Result<bool, AppError>;

    /// Next value of the sequential human-facing number.
    async fn next_number(&self) -> Result<i64, AppError>;

    /// Targeted update of the subscription linkage, bypassing a full save.
    async fn set_subscription_id(
        &self,
        invoice_id: i64,
        subscription_id: Option<i64>,
    ) -> Result<(), AppError>;

    /// Number of renewal (child) invoices under a parent invoice.
    async fn count_renewals(&self, parent_id: i64) -> Result<u32, AppError>;

    async fn add_note(&self, invoice_id: i64, note: &str, system: bool) -> Result<(), AppError>;

    async fn list_notes(&self, invoice_id: i64) -> Result<Vec<InvoiceNote>, AppError>;
}
