//! Line item model.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit used by recurring and trial billing terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Day,
    Week,
    Month,
    Year,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Day => "day",
            BillingPeriod::Week => "week",
            BillingPeriod::Month => "month",
            BillingPeriod::Year => "year",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "day" => BillingPeriod::Day,
            "week" => BillingPeriod::Week,
            "year" => BillingPeriod::Year,
            _ => BillingPeriod::Month,
        }
    }

    /// Advance a timestamp by `interval` periods.
    pub fn advance(&self, from: DateTime<Utc>, interval: u32) -> DateTime<Utc> {
        match self {
            BillingPeriod::Day => from + Duration::days(i64::from(interval)),
            BillingPeriod::Week => from + Duration::weeks(i64::from(interval)),
            BillingPeriod::Month => from + Months::new(interval),
            BillingPeriod::Year => from + Months::new(interval * 12),
        }
    }
}

/// Trial terms, e.g. "2 week".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialTerms {
    pub interval: u32,
    pub period: BillingPeriod,
}

impl fmt::Display for TrialTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.interval, self.period.as_str())
    }
}

impl FromStr for TrialTerms {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let interval = parts.next().and_then(|p| p.parse().ok()).ok_or(())?;
        let period = BillingPeriod::from_string(parts.next().ok_or(())?);
        Ok(TrialTerms { interval, period })
    }
}

/// Repeating billing terms of a recurring line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTerms {
    /// Unit price charged on each renewal.
    pub price: Decimal,
    pub period: BillingPeriod,
    pub interval: u32,
    /// Cap on the number of payments. 0 = unlimited.
    pub limit: u32,
    pub trial: Option<TrialTerms>,
}

/// Line item on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: i64,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Whether the item is currently available for purchase.
    pub purchasable: bool,
    pub recurring: Option<RecurringTerms>,
}

impl LineItem {
    pub fn new(item_id: i64, name: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            item_id,
            name: name.into(),
            quantity,
            unit_price,
            purchasable: true,
            recurring: None,
        }
    }

    pub fn with_recurring(mut self, terms: RecurringTerms) -> Self {
        self.recurring = Some(terms);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring.is_some()
    }

    pub fn has_free_trial(&self) -> bool {
        self.recurring
            .as_ref()
            .map(|terms| terms.trial.is_some())
            .unwrap_or(false)
    }

    /// Amount this item contributes to the initial charge.
    pub fn sub_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    /// Amount this item contributes to each renewal charge.
    pub fn recurring_sub_total(&self) -> Decimal {
        match &self.recurring {
            Some(terms) => self.quantity * terms.price,
            None => Decimal::ZERO,
        }
    }
}
