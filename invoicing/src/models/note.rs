//! Invoice audit note model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Audit note attached to an invoice.
///
/// Status transitions and listener failures are recorded here during save.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceNote {
    pub note_id: i64,
    pub invoice_id: i64,
    pub note: String,
    /// System notes are written by the engine, not an operator.
    pub system: bool,
    pub date_created: DateTime<Utc>,
}
