//! Invoice events.

use crate::models::{Invoice, StatusTransition};
use billing_core::events::EventBus;

/// Events emitted by [`crate::services::InvoiceService::save`].
///
/// `StatusChanged` fires once per save for the transitions staged since the
/// previous save. `PaymentStatusChanged` additionally fires when the
/// transition moved an unpaid invoice into a paid status.
#[derive(Clone)]
pub enum InvoiceEvent {
    Created {
        invoice: Invoice,
    },
    Updated {
        invoice: Invoice,
    },
    StatusChanged {
        invoice: Invoice,
        transition: StatusTransition,
    },
    PaymentStatusChanged {
        invoice: Invoice,
        transition: StatusTransition,
    },
}

pub type InvoiceEvents = EventBus<InvoiceEvent>;
