//! Invoice lifecycle orchestration.

use crate::discounts::DiscountResolver;
use crate::events::{InvoiceEvent, InvoiceEvents};
use crate::models::{Invoice, InvoiceNote, InvoiceStatus, StatusTransition};
use crate::services::metrics::{
    ERRORS_TOTAL, INVOICES_TOTAL, INVOICE_AMOUNT_TOTAL, STATUS_TRANSITIONS_TOTAL,
};
use crate::store::InvoiceStore;
use billing_core::config::Config;
use billing_core::error::AppError;
use billing_core::events::DispatchOutcome;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Saves invoices and fires lifecycle events.
///
/// A save is one unit of work: completion stamping, totals recalculation,
/// identity generation, persistence, then event dispatch. The staged status
/// transition is consumed before listeners run, so a listener that saves the
/// invoice again cannot re-fire the same transition.
pub struct InvoiceService {
    store: Arc<dyn InvoiceStore>,
    events: Arc<InvoiceEvents>,
    discounts: Arc<dyn DiscountResolver>,
    config: Config,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        events: Arc<InvoiceEvents>,
        discounts: Arc<dyn DiscountResolver>,
        config: Config,
    ) -> Self {
        Self {
            store,
            events,
            discounts,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn InvoiceStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<InvoiceEvents> {
        &self.events
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh, unsaved invoice seeded from runtime settings.
    pub fn new_invoice(&self) -> Invoice {
        Invoice::new_draft(&self.config)
    }

    #[instrument(skip(self))]
    pub async fn load(&self, invoice_id: i64) -> Result<Option<Invoice>, AppError> {
        let record = self.store.fetch(invoice_id).await?;
        Ok(record.map(Invoice::from_record))
    }

    #[instrument(skip(self, invoice_key))]
    pub async fn load_by_key(&self, invoice_key: &str) -> Result<Option<Invoice>, AppError> {
        let record = self.store.find_by_key(invoice_key).await?;
        Ok(record.map(Invoice::from_record))
    }

    #[instrument(skip(self))]
    pub async fn load_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, AppError> {
        let record = self.store.find_by_number(invoice_number).await?;
        Ok(record.map(Invoice::from_record))
    }

    /// Persist the invoice and fire the events the save produced.
    ///
    /// Listener failures are logged and recorded as invoice notes; they never
    /// abort the save.
    #[instrument(skip(self, invoice), fields(invoice_id = invoice.id))]
    pub async fn save(&self, invoice: &mut Invoice) -> Result<i64, AppError> {
        let now = Utc::now();
        invoice.maybe_set_date_completed(now);
        invoice.recalculate_total();

        let is_new = invoice.id == 0;
        if is_new {
            if invoice.key.is_empty() {
                invoice.key = Uuid::new_v4().simple().to_string();
            }
            if invoice.number.is_empty() {
                let sequence = self.store.next_number().await?;
                invoice.number = self.config.format_invoice_number(sequence);
            }
            if invoice.path.is_empty() {
                invoice.path = invoice.number.to_lowercase();
            }
            if invoice.date_created.is_none() {
                invoice.date_created = Some(now);
            }
        }
        invoice.date_modified = Some(now);

        if is_new {
            let invoice_id = self.store.insert(&invoice.to_record()).await?;
            invoice.id = invoice_id;

            INVOICES_TOTAL
                .with_label_values(&[invoice.status().as_str()])
                .inc();
            INVOICE_AMOUNT_TOTAL
                .with_label_values(&[invoice.currency.as_str()])
                .inc_by(invoice.total().to_f64().unwrap_or(0.0));

            info!(
                invoice_id = invoice.id,
                number = %invoice.number,
                "Invoice created"
            );
            self.events
                .dispatch(&InvoiceEvent::Created {
                    invoice: invoice.clone(),
                })
                .await;
        } else {
            self.store.update(&invoice.to_record()).await?;
            self.events
                .dispatch(&InvoiceEvent::Updated {
                    invoice: invoice.clone(),
                })
                .await;
        }

        if let Some(transition) = invoice.take_status_transition() {
            self.process_status_transition(invoice, transition).await?;
        }

        Ok(invoice.id)
    }

    async fn process_status_transition(
        &self,
        invoice: &mut Invoice,
        transition: StatusTransition,
    ) -> Result<(), AppError> {
        STATUS_TRANSITIONS_TOTAL
            .with_label_values(&[transition.from.as_str(), transition.to.as_str()])
            .inc();

        let mut message = format!(
            "Status changed from {} to {}.",
            transition.from.as_str(),
            transition.to.as_str()
        );
        if !transition.note.is_empty() {
            message = format!("{} {}", transition.note, message);
        }
        self.store
            .add_note(invoice.id, &message, !transition.manual)
            .await?;

        info!(
            invoice_id = invoice.id,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "Invoice status changed"
        );

        let outcomes = self
            .events
            .dispatch(&InvoiceEvent::StatusChanged {
                invoice: invoice.clone(),
                transition: transition.clone(),
            })
            .await;
        self.record_listener_failures(invoice.id, &outcomes).await;

        if transition.is_payment_completion() {
            let outcomes = self
                .events
                .dispatch(&InvoiceEvent::PaymentStatusChanged {
                    invoice: invoice.clone(),
                    transition,
                })
                .await;
            self.record_listener_failures(invoice.id, &outcomes).await;
        }

        Ok(())
    }

    /// Record failed listeners as invoice notes so the audit trail shows what
    /// went wrong, without failing the save.
    async fn record_listener_failures(&self, invoice_id: i64, outcomes: &[DispatchOutcome]) {
        for outcome in outcomes {
            if let Err(error) = &outcome.result {
                ERRORS_TOTAL.with_label_values(&["listener"]).inc();
                warn!(
                    invoice_id = invoice_id,
                    listener = outcome.listener,
                    error = %error,
                    "Status transition listener failed"
                );
                let note = format!(
                    "Error during status transition. {}: {}",
                    outcome.listener, error
                );
                if let Err(note_error) = self.store.add_note(invoice_id, &note, true).await {
                    warn!(
                        invoice_id = invoice_id,
                        error = %note_error,
                        "Failed to record listener failure note"
                    );
                }
            }
        }
    }

    /// Move an invoice to a new status and save, in one step.
    #[instrument(skip(self, note))]
    pub async fn update_status(
        &self,
        invoice_id: i64,
        new_status: InvoiceStatus,
        note: &str,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.load(invoice_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invoice {} does not exist", invoice_id))
        })?;

        invoice.set_status(new_status, note, true);
        self.save(&mut invoice).await?;
        Ok(invoice)
    }

    /// Refund a paid invoice.
    #[instrument(skip(self, note))]
    pub async fn refund(&self, invoice_id: i64, note: &str) -> Result<Invoice, AppError> {
        let invoice = self.load(invoice_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invoice {} does not exist", invoice_id))
        })?;

        if !invoice.is_paid() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is not paid and cannot be refunded",
                invoice_id
            )));
        }

        self.update_status(invoice_id, InvoiceStatus::Refunded, note)
            .await
    }

    /// Resolve and apply a discount code, adding its amount as a discount
    /// charge entry.
    #[instrument(skip(self, invoice, amount), fields(invoice_id = invoice.id))]
    pub async fn apply_discount_code(
        &self,
        invoice: &mut Invoice,
        code: &str,
        amount: Decimal,
    ) -> Result<(), AppError> {
        let resolved = self
            .discounts
            .resolve(code)
            .await
            .ok_or_else(|| AppError::InvalidDiscount(code.to_string()))?;

        if !resolved.active {
            return Err(AppError::InvalidDiscount(code.to_string()));
        }

        invoice.discount_code = Some(code.to_string());
        invoice.add_discount("discount_code", amount, resolved.recurring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, invoice_id: i64) -> Result<bool, AppError> {
        let deleted = self.store.delete(invoice_id).await?;
        if deleted {
            info!(invoice_id = invoice_id, "Invoice deleted");
        }
        Ok(deleted)
    }

    pub async fn add_note(
        &self,
        invoice_id: i64,
        note: &str,
        system: bool,
    ) -> Result<(), AppError> {
        self.store.add_note(invoice_id, note, system).await
    }

    pub async fn notes(&self, invoice_id: i64) -> Result<Vec<InvoiceNote>, AppError> {
        self.store.list_notes(invoice_id).await
    }

    /// Number of renewal invoices generated under a parent invoice.
    pub async fn count_renewals(&self, parent_id: i64) -> Result<u32, AppError> {
        self.store.count_renewals(parent_id).await
    }
}
