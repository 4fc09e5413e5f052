//! Domain models for the invoicing crate.

mod invoice;
mod line_item;
mod note;

pub use invoice::{
    AmountBuckets, ChargeEntry, Invoice, InvoiceMode, InvoiceRecord, InvoiceStatus,
    InvoiceTemplate, InvoiceTotals, InvoiceType, StatusTransition,
};
pub use line_item::{BillingPeriod, LineItem, RecurringTerms, TrialTerms};
pub use note::InvoiceNote;
