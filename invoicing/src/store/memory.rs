//! In-memory invoice store, used by tests and single-process setups.

use crate::models::{InvoiceNote, InvoiceRecord};
use crate::store::InvoiceStore;
use async_trait::async_trait;
use billing_core::error::AppError;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    invoices: BTreeMap<i64, InvoiceRecord>,
    notes: Vec<InvoiceNote>,
    next_id: i64,
    next_number: i64,
    next_note_id: i64,
}

#[derive(Default)]
pub struct InMemoryInvoiceStore {
    inner: Mutex<Inner>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("invoice store poisoned")
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn insert(&self, record: &InvoiceRecord) -> Result<i64, AppError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let invoice_id = inner.next_id;
        let mut record = record.clone();
        record.invoice_id = invoice_id;
        inner.invoices.insert(invoice_id, record);
        Ok(invoice_id)
    }

    async fn update(&self, record: &InvoiceRecord) -> Result<(), AppError> {
        let mut inner = self.lock();
        if !inner.invoices.contains_key(&record.invoice_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} does not exist",
                record.invoice_id
            )));
        }
        inner.invoices.insert(record.invoice_id, record.clone());
        Ok(())
    }

    async fn fetch(&self, invoice_id: i64) -> Result<Option<InvoiceRecord>, AppError> {
        Ok(self.lock().invoices.get(&invoice_id).cloned())
    }

    async fn find_by_key(&self, invoice_key: &str) -> Result<Option<InvoiceRecord>, AppError> {
        Ok(self
            .lock()
            .invoices
            .values()
            .find(|record| record.invoice_key == invoice_key)
            .cloned())
    }

    async fn find_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<InvoiceRecord>, AppError> {
        Ok(self
            .lock()
            .invoices
            .values()
            .find(|record| record.invoice_number == invoice_number)
            .cloned())
    }

    async fn delete(&self, invoice_id: i64) -> Result<bool, AppError> {
        let mut inner = self.lock();
        let removed = inner.invoices.remove(&invoice_id).is_some();
        inner.notes.retain(|note| note.invoice_id != invoice_id);
        Ok(removed)
    }

    async fn next_number(&self) -> Result<i64, AppError> {
        let mut inner = self.lock();
        inner.next_number += 1;
        Ok(inner.next_number)
    }

    async fn set_subscription_id(
        &self,
        invoice_id: i64,
        subscription_id: Option<i64>,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        if let Some(record) = inner.invoices.get_mut(&invoice_id) {
            record.subscription_id = subscription_id;
        }
        Ok(())
    }

    async fn count_renewals(&self, parent_id: i64) -> Result<u32, AppError> {
        Ok(self
            .lock()
            .invoices
            .values()
            .filter(|record| record.parent_id == parent_id)
            .count() as u32)
    }

    async fn add_note(&self, invoice_id: i64, note: &str, system: bool) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.next_note_id += 1;
        let note = InvoiceNote {
            note_id: inner.next_note_id,
            invoice_id,
            note: note.to_string(),
            system,
            date_created: Utc::now(),
        };
        inner.notes.push(note);
        Ok(())
    }

    async fn list_notes(&self, invoice_id: i64) -> Result<Vec<InvoiceNote>, AppError> {
        Ok(self
            .lock()
            .notes
            .iter()
            .filter(|note| note.invoice_id == invoice_id)
            .cloned()
            .collect())
    }
}
