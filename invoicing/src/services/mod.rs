mod invoices;
pub mod metrics;

pub use invoices::InvoiceService;
