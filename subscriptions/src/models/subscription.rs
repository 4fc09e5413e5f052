//! Subscription aggregate.

use chrono::{DateTime, Utc};
use invoicing::models::{BillingPeriod, TrialTerms};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Subscription status.
///
/// Unknown values coerce to `Pending` rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Trialling,
    Active,
    Failed,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Trialling => "trialling",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Failed => "failed",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "trialling" => SubscriptionStatus::Trialling,
            "active" => SubscriptionStatus::Active,
            "failed" => SubscriptionStatus::Failed,
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            _ => SubscriptionStatus::Pending,
        }
    }

    /// Statuses under which the subscription entitles the customer.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialling
        )
    }
}

/// Staged status move, processed once on the next save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionTransition {
    pub from: SubscriptionStatus,
    pub to: SubscriptionStatus,
}

/// The subscription aggregate.
///
/// A subscription always hangs off one parent invoice and mirrors that
/// invoice's recurring line item. Renewal invoices reference the parent, not
/// the subscription row.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// 0 = unsaved.
    pub id: i64,
    pub customer_id: i64,
    pub parent_invoice_id: i64,
    pub product_id: i64,

    pub initial_amount: Decimal,
    pub recurring_amount: Decimal,
    pub period: BillingPeriod,
    /// Periods per billing cycle, e.g. every 3 months.
    pub frequency: u32,
    /// Cap on the number of payments. 0 = unlimited.
    pub bill_times: u32,
    pub trial_period: Option<TrialTerms>,

    pub date_created: Option<DateTime<Utc>>,
    pub next_renewal_date: Option<DateTime<Utc>>,

    status: SubscriptionStatus,
    status_transition: Option<SubscriptionTransition>,
}

impl Subscription {
    pub fn new(customer_id: i64, parent_invoice_id: i64) -> Self {
        Self {
            id: 0,
            customer_id,
            parent_invoice_id,
            product_id: 0,
            initial_amount: Decimal::ZERO,
            recurring_amount: Decimal::ZERO,
            period: BillingPeriod::Month,
            frequency: 1,
            bill_times: 0,
            trial_period: None,
            date_created: None,
            next_renewal_date: None,
            status: SubscriptionStatus::Pending,
            status_transition: None,
        }
    }

    pub fn from_record(record: SubscriptionRecord) -> Self {
        Self {
            id: record.subscription_id,
            customer_id: record.customer_id,
            parent_invoice_id: record.parent_invoice_id,
            product_id: record.product_id,
            initial_amount: record.initial_amount,
            recurring_amount: record.recurring_amount,
            period: BillingPeriod::from_string(&record.period),
            frequency: record.frequency.max(1) as u32,
            bill_times: record.bill_times.max(0) as u32,
            trial_period: record
                .trial_period
                .as_deref()
                .and_then(|terms| terms.parse().ok()),
            date_created: record.date_created,
            next_renewal_date: record.next_renewal_date,
            status: SubscriptionStatus::from_string(&record.status),
            status_transition: None,
        }
    }

    pub fn to_record(&self) -> SubscriptionRecord {
        SubscriptionRecord {
            subscription_id: self.id,
            customer_id: self.customer_id,
            parent_invoice_id: self.parent_invoice_id,
            product_id: self.product_id,
            status: self.status.as_str().to_string(),
            initial_amount: self.initial_amount,
            recurring_amount: self.recurring_amount,
            period: self.period.as_str().to_string(),
            frequency: self.frequency as i32,
            bill_times: self.bill_times as i32,
            trial_period: self.trial_period.map(|terms| terms.to_string()),
            date_created: self.date_created,
            next_renewal_date: self.next_renewal_date,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    /// Updates the status, staging a transition for the next save.
    ///
    /// Repeated calls before a save keep the `from` of the first staged
    /// transition.
    pub fn set_status(
        &mut self,
        new_status: SubscriptionStatus,
    ) -> (SubscriptionStatus, SubscriptionStatus) {
        let old_status = self.status;
        self.status = new_status;

        if old_status != new_status {
            let from = self
                .status_transition
                .map(|staged| staged.from)
                .unwrap_or(old_status);
            self.status_transition = Some(SubscriptionTransition {
                from,
                to: new_status,
            });
        }

        (old_status, new_status)
    }

    pub fn take_status_transition(&mut self) -> Option<SubscriptionTransition> {
        self.status_transition.take()
    }

    pub fn staged_transition(&self) -> Option<&SubscriptionTransition> {
        self.status_transition.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether cancellation is currently allowed.
    pub fn can_cancel(&self) -> bool {
        self.status.is_active()
    }

    pub fn has_trial_period(&self) -> bool {
        self.trial_period.is_some()
    }

    /// The renewal timestamp one billing cycle after `from`.
    ///
    /// During a trial the cycle length comes from the trial terms instead of
    /// the regular period.
    pub fn next_renewal_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self.trial_period {
            Some(trial) if self.status == SubscriptionStatus::Trialling => {
                trial.period.advance(from, trial.interval)
            }
            _ => self.period.advance(from, self.frequency),
        }
    }
}

/// Persisted subscription row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionRecord {
    pub subscription_id: i64,
    pub customer_id: i64,
    pub parent_invoice_id: i64,
    pub product_id: i64,
    pub status: String,
    pub initial_amount: Decimal,
    pub recurring_amount: Decimal,
    pub period: String,
    pub frequency: i32,
    pub bill_times: i32,
    pub trial_period: Option<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub next_renewal_date: Option<DateTime<Utc>>,
}
