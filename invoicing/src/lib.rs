//! Invoice aggregate: totals engine, status machine and persistence.
//!
//! The [`models::Invoice`] aggregate owns one invoice's line items, fees,
//! discounts and taxes, computes initial and recurring totals, and stages
//! status transitions that [`services::InvoiceService::save`] processes
//! exactly once per save.

pub mod discounts;
pub mod events;
pub mod models;
pub mod services;
pub mod store;

pub use discounts::{DiscountResolver, ResolvedDiscount, StaticDiscountResolver};
pub use events::InvoiceEvent;
pub use models::{
    BillingPeriod, ChargeEntry, Invoice, InvoiceMode, InvoiceNote, InvoiceRecord, InvoiceStatus,
    InvoiceTemplate, InvoiceType, LineItem, RecurringTerms, StatusTransition, TrialTerms,
};
pub use services::InvoiceService;
pub use store::{InMemoryInvoiceStore, InvoiceStore, PgInvoiceStore};
