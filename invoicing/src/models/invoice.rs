//! Invoice aggregate.
//!
//! Owns one invoice's line items, fees, discounts and taxes. Every monetary
//! aggregate is computed twice, once for the initial charge and once for the
//! recurring charge, and `total = tax + fee - discount + subtotal` (floored at
//! zero) holds independently for both buckets.

use crate::models::line_item::LineItem;
use billing_core::config::Config;
use billing_core::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Invoice lifecycle status.
///
/// Unknown values coerce to `Pending` rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Processing,
    Renewal,
    OnHold,
    Failed,
    Cancelled,
    Refunded,
    Draft,
    AutoDraft,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Renewal => "renewal",
            InvoiceStatus::OnHold => "onhold",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Refunded => "refunded",
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::AutoDraft => "auto-draft",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" | "publish" => InvoiceStatus::Paid,
            "processing" => InvoiceStatus::Processing,
            "renewal" => InvoiceStatus::Renewal,
            "onhold" => InvoiceStatus::OnHold,
            "failed" => InvoiceStatus::Failed,
            "cancelled" => InvoiceStatus::Cancelled,
            "refunded" => InvoiceStatus::Refunded,
            "draft" => InvoiceStatus::Draft,
            "auto-draft" => InvoiceStatus::AutoDraft,
            _ => InvoiceStatus::Pending,
        }
    }

    /// Statuses that count as paid.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Paid | InvoiceStatus::Processing | InvoiceStatus::Renewal
        )
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::AutoDraft)
    }
}

/// Invoice type. Quotes share the invoice lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Invoice,
    Quote,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Invoice => "invoice",
            InvoiceType::Quote => "quote",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "quote" => InvoiceType::Quote,
            _ => InvoiceType::Invoice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceMode {
    Live,
    Test,
}

impl InvoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceMode::Live => "live",
            InvoiceMode::Test => "test",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "test" => InvoiceMode::Test,
            _ => InvoiceMode::Live,
        }
    }
}

/// How line quantities are captured on the invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceTemplate {
    Quantity,
    Hours,
    Amount,
}

impl InvoiceTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceTemplate::Quantity => "quantity",
            InvoiceTemplate::Hours => "hours",
            InvoiceTemplate::Amount => "amount",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "hours" => InvoiceTemplate::Hours,
            "amount" => InvoiceTemplate::Amount,
            _ => InvoiceTemplate::Quantity,
        }
    }
}

/// One fee, discount or tax entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeEntry {
    pub amount: Decimal,
    /// Whether the entry applies to renewal charges or only the initial one.
    pub recurring: bool,
}

/// Staged status transition, processed exactly once on the next save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub note: String,
    pub manual: bool,
}

impl StatusTransition {
    /// Whether this transition represents a completed payment.
    pub fn is_payment_completion(&self) -> bool {
        matches!(
            self.from,
            InvoiceStatus::Cancelled | InvoiceStatus::Pending | InvoiceStatus::Failed
        ) && self.to.is_paid()
    }
}

/// Initial/recurring split of one aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AmountBuckets {
    pub initial: Decimal,
    pub recurring: Decimal,
}

impl AmountBuckets {
    fn select(&self, renewal: bool) -> Decimal {
        if renewal {
            self.recurring
        } else {
            self.initial
        }
    }
}

/// Totals table cached for one computation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvoiceTotals {
    pub subtotal: AmountBuckets,
    pub discount: AmountBuckets,
    pub tax: AmountBuckets,
    pub fee: AmountBuckets,
}

/// The invoice aggregate.
///
/// Collections and computation state are private: items enter through
/// [`Invoice::add_item`] so the recurring-item reference stays consistent,
/// and charge entries through the `add_fee`/`add_discount`/`add_tax` upserts.
#[derive(Debug, Clone)]
pub struct Invoice {
    /// 0 = unsaved.
    pub id: i64,
    /// 0 = parent invoice; non-zero = renewal of another invoice.
    pub parent_id: i64,
    pub invoice_type: InvoiceType,
    pub mode: InvoiceMode,
    pub template: InvoiceTemplate,
    /// Opaque unique token, generated on first save.
    pub key: String,
    /// Human-facing number, generated on first save.
    pub number: String,
    pub path: String,
    pub description: Option<String>,
    pub currency: String,

    pub customer_id: i64,
    pub user_ip: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub company: Option<String>,
    pub vat_number: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub address: Option<String>,
    pub address_confirmed: bool,

    pub discount_code: Option<String>,
    pub disable_taxes: bool,
    pub subscription_id: Option<i64>,

    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    pub date_completed: Option<DateTime<Utc>>,

    /// Persisted caches of the currently-applicable bucket.
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub total_fees: Decimal,

    status: InvoiceStatus,
    items: Vec<LineItem>,
    fees: BTreeMap<String, ChargeEntry>,
    discounts: BTreeMap<String, ChargeEntry>,
    taxes: BTreeMap<String, ChargeEntry>,

    recurring_item: Option<i64>,
    totals: Option<InvoiceTotals>,
    status_transition: Option<StatusTransition>,
}

impl Invoice {
    /// A fresh, unsaved invoice seeded from runtime settings.
    pub fn new_draft(config: &Config) -> Self {
        Self {
            id: 0,
            parent_id: 0,
            invoice_type: InvoiceType::Invoice,
            mode: if config.is_test_mode() {
                InvoiceMode::Test
            } else {
                InvoiceMode::Live
            },
            template: InvoiceTemplate::Quantity,
            key: String::new(),
            number: String::new(),
            path: String::new(),
            description: None,
            currency: config.currency.clone(),
            customer_id: 0,
            user_ip: None,
            first_name: None,
            last_name: None,
            email: None,
            phone: None,
            country: None,
            state: None,
            city: None,
            zip: None,
            company: None,
            vat_number: None,
            vat_rate: None,
            address: None,
            address_confirmed: false,
            discount_code: None,
            disable_taxes: !config.taxes_enabled,
            subscription_id: None,
            date_created: None,
            date_modified: None,
            due_date: None,
            date_completed: None,
            subtotal: Decimal::ZERO,
            total_discount: Decimal::ZERO,
            total_tax: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            status: InvoiceStatus::Pending,
            items: Vec::new(),
            fees: BTreeMap::new(),
            discounts: BTreeMap::new(),
            taxes: BTreeMap::new(),
            recurring_item: None,
            totals: None,
            status_transition: None,
        }
    }

    /// Hydrate from a persisted record.
    ///
    /// The recurring-item reference is not a first-class column; it is
    /// rebuilt from the item collection, last recurring item winning.
    pub fn from_record(record: InvoiceRecord) -> Self {
        let items = record.items.0;
        let recurring_item = items
            .iter()
            .filter(|item| item.is_recurring())
            .next_back()
            .map(|item| item.item_id);

        Self {
            id: record.invoice_id,
            parent_id: record.parent_id,
            invoice_type: InvoiceType::from_string(&record.invoice_type),
            mode: InvoiceMode::from_string(&record.mode),
            template: InvoiceTemplate::from_string(&record.template),
            key: record.invoice_key,
            number: record.invoice_number,
            path: record.path,
            description: record.description,
            currency: record.currency,
            customer_id: record.customer_id,
            user_ip: record.user_ip,
            first_name: record.first_name,
            last_name: record.last_name,
            email: record.email,
            phone: record.phone,
            country: record.country,
            state: record.state,
            city: record.city,
            zip: record.zip,
            company: record.company,
            vat_number: record.vat_number,
            vat_rate: record.vat_rate,
            address: record.address,
            address_confirmed: record.address_confirmed,
            discount_code: record.discount_code,
            disable_taxes: record.disable_taxes,
            subscription_id: record.subscription_id,
            date_created: record.date_created,
            date_modified: record.date_modified,
            due_date: record.due_date,
            date_completed: record.date_completed,
            subtotal: record.subtotal,
            total_discount: record.total_discount,
            total_tax: record.total_tax,
            total_fees: record.total_fees,
            status: InvoiceStatus::from_string(&record.status),
            items,
            fees: record.fees.0,
            discounts: record.discounts.0,
            taxes: record.taxes.0,
            recurring_item,
            totals: None,
            status_transition: None,
        }
    }

    /// The persisted form of this invoice.
    pub fn to_record(&self) -> InvoiceRecord {
        InvoiceRecord {
            invoice_id: self.id,
            parent_id: self.parent_id,
            invoice_type: self.invoice_type.as_str().to_string(),
            status: self.status.as_str().to_string(),
            mode: self.mode.as_str().to_string(),
            template: self.template.as_str().to_string(),
            invoice_key: self.key.clone(),
            invoice_number: self.number.clone(),
            path: self.path.clone(),
            description: self.description.clone(),
            currency: self.currency.clone(),
            customer_id: self.customer_id,
            user_ip: self.user_ip.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            country: self.country.clone(),
            state: self.state.clone(),
            city: self.city.clone(),
            zip: self.zip.clone(),
            company: self.company.clone(),
            vat_number: self.vat_number.clone(),
            vat_rate: self.vat_rate,
            address: self.address.clone(),
            address_confirmed: self.address_confirmed,
            discount_code: self.discount_code.clone(),
            disable_taxes: self.disable_taxes,
            subscription_id: self.subscription_id,
            date_created: self.date_created,
            date_modified: self.date_modified,
            due_date: self.due_date,
            date_completed: self.date_completed,
            subtotal: self.subtotal,
            total_discount: self.total_discount,
            total_tax: self.total_tax,
            total_fees: self.total_fees,
            items: Json(self.items.clone()),
            fees: Json(self.fees.clone()),
            discounts: Json(self.discounts.clone()),
            taxes: Json(self.taxes.clone()),
        }
    }

    /// A fresh renewal (child) invoice for the next billing cycle.
    ///
    /// Items and charge collections are copied; the renewal reads its
    /// amounts from the recurring buckets. Identity, dates and status are
    /// reset so the renewal gets its own key, number and lifecycle.
    pub fn create_renewal(&self) -> Invoice {
        let mut renewal = self.clone();
        renewal.id = 0;
        renewal.parent_id = self.id;
        renewal.key = String::new();
        renewal.number = String::new();
        renewal.path = String::new();
        renewal.status = InvoiceStatus::Pending;
        renewal.date_created = None;
        renewal.date_modified = None;
        renewal.date_completed = None;
        renewal.due_date = None;
        renewal.totals = None;
        renewal.status_transition = None;
        renewal
    }

    // -------------------------------------------------------------------------
    // Items
    // -------------------------------------------------------------------------

    /// Adds an item, upserting by item id.
    ///
    /// A recurring item becomes *the* tracked recurring item; an invoice
    /// supports at most one recurring line and the last one added wins.
    pub fn add_item(&mut self, item: LineItem) -> Result<(), AppError> {
        if item.item_id > 0 && !item.purchasable {
            return Err(AppError::ItemNotPurchasable(item.name.clone()));
        }

        if item.is_recurring() {
            self.recurring_item = Some(item.item_id);
        }

        match self.items.iter_mut().find(|i| i.item_id == item.item_id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }

        self.totals = None;
        Ok(())
    }

    pub fn get_item(&self, item_id: i64) -> Option<&LineItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    pub fn remove_item(&mut self, item_id: i64) {
        if self.recurring_item == Some(item_id) {
            self.recurring_item = None;
        }
        self.items.retain(|item| item.item_id != item_id);
        self.totals = None;
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// The tracked recurring line item, if any.
    pub fn recurring(&self) -> Option<&LineItem> {
        self.recurring_item.and_then(|id| self.get_item(id))
    }

    pub fn recurring_item_id(&self) -> Option<i64> {
        self.recurring_item
    }

    // -------------------------------------------------------------------------
    // Fees, discounts, taxes
    // -------------------------------------------------------------------------

    /// Upserts a fee, accumulating the amount if the key already exists.
    pub fn add_fee(&mut self, name: &str, amount: Decimal, recurring: bool) {
        Self::upsert_charge(&mut self.fees, name, amount, recurring);
        self.totals = None;
    }

    pub fn get_fee(&self, name: &str) -> Option<&ChargeEntry> {
        self.fees.get(name)
    }

    pub fn remove_fee(&mut self, name: &str) {
        self.fees.remove(name);
        self.totals = None;
    }

    pub fn fees(&self) -> &BTreeMap<String, ChargeEntry> {
        &self.fees
    }

    pub fn add_discount(&mut self, name: &str, amount: Decimal, recurring: bool) {
        Self::upsert_charge(&mut self.discounts, name, amount, recurring);
        self.totals = None;
    }

    pub fn get_discount(&self, name: &str) -> Option<&ChargeEntry> {
        self.discounts.get(name)
    }

    pub fn remove_discount(&mut self, name: &str) {
        self.discounts.remove(name);
        self.totals = None;
    }

    pub fn discounts(&self) -> &BTreeMap<String, ChargeEntry> {
        &self.discounts
    }

    /// Upserts a tax entry. No-op when the invoice is not taxable.
    pub fn add_tax(&mut self, name: &str, amount: Decimal, recurring: bool) {
        if !self.is_taxable() {
            return;
        }
        Self::upsert_charge(&mut self.taxes, name, amount, recurring);
        self.totals = None;
    }

    pub fn get_tax(&self, name: &str) -> Option<&ChargeEntry> {
        self.taxes.get(name)
    }

    pub fn remove_tax(&mut self, name: &str) {
        self.taxes.remove(name);
        self.totals = None;
    }

    pub fn taxes(&self) -> &BTreeMap<String, ChargeEntry> {
        &self.taxes
    }

    fn upsert_charge(
        entries: &mut BTreeMap<String, ChargeEntry>,
        name: &str,
        amount: Decimal,
        recurring: bool,
    ) {
        entries
            .entry(name.to_string())
            .and_modify(|entry| {
                entry.amount += amount;
                entry.recurring = recurring;
            })
            .or_insert(ChargeEntry { amount, recurring });
    }

    // -------------------------------------------------------------------------
    // Totals
    // -------------------------------------------------------------------------

    /// Recalculates the subtotal and returns the currently-applicable bucket.
    pub fn recalculate_subtotal(&mut self) -> Decimal {
        let mut initial = Decimal::ZERO;
        let mut recurring = Decimal::ZERO;

        for item in &self.items {
            initial += item.sub_total();
            recurring += item.recurring_sub_total();
        }

        let buckets = AmountBuckets { initial, recurring };
        let selected = buckets.select(self.is_renewal());
        self.subtotal = selected;
        self.totals.get_or_insert_with(Default::default).subtotal = buckets;
        selected
    }

    pub fn recalculate_total_fees(&mut self) -> Decimal {
        let buckets = Self::charge_buckets(&self.fees);
        let selected = buckets.select(self.is_renewal());
        self.total_fees = selected;
        self.totals.get_or_insert_with(Default::default).fee = buckets;
        selected
    }

    pub fn recalculate_total_discount(&mut self) -> Decimal {
        let buckets = Self::charge_buckets(&self.discounts);
        let selected = buckets.select(self.is_renewal());
        self.total_discount = selected;
        self.totals.get_or_insert_with(Default::default).discount = buckets;
        selected
    }

    pub fn recalculate_total_tax(&mut self) -> Decimal {
        let buckets = Self::charge_buckets(&self.taxes);
        let selected = buckets.select(self.is_renewal());
        self.total_tax = selected;
        self.totals.get_or_insert_with(Default::default).tax = buckets;
        selected
    }

    fn charge_buckets(entries: &BTreeMap<String, ChargeEntry>) -> AmountBuckets {
        let mut buckets = AmountBuckets::default();
        for entry in entries.values() {
            if entry.recurring {
                buckets.recurring += entry.amount;
            } else {
                buckets.initial += entry.amount;
            }
        }
        buckets
    }

    /// Recalculates all four aggregates and returns the amount due.
    pub fn recalculate_total(&mut self) -> Decimal {
        self.recalculate_subtotal();
        self.recalculate_total_fees();
        self.recalculate_total_discount();
        self.recalculate_total_tax();
        self.total()
    }

    fn totals_table(&mut self) -> InvoiceTotals {
        if self.totals.is_none() {
            self.recalculate_total();
        }
        self.totals.unwrap_or_default()
    }

    /// Amount due on the first charge.
    pub fn initial_total(&mut self) -> Decimal {
        let totals = self.totals_table();
        let total = totals.tax.initial + totals.fee.initial - totals.discount.initial
            + totals.subtotal.initial;
        total.max(Decimal::ZERO)
    }

    /// Amount due on each renewal charge.
    pub fn recurring_total(&mut self) -> Decimal {
        let totals = self.totals_table();
        let total = totals.tax.recurring + totals.fee.recurring - totals.discount.recurring
            + totals.subtotal.recurring;
        total.max(Decimal::ZERO)
    }

    /// The externally-relevant amount due: recurring for renewals,
    /// initial otherwise.
    pub fn total(&mut self) -> Decimal {
        if self.is_renewal() {
            self.recurring_total()
        } else {
            self.initial_total()
        }
    }

    // -------------------------------------------------------------------------
    // Status machine
    // -------------------------------------------------------------------------

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    /// Updates the status, staging a transition for the next save.
    ///
    /// Repeated calls before a save keep the `from` of the first staged
    /// transition so the eventual notification describes the full move.
    pub fn set_status(
        &mut self,
        new_status: InvoiceStatus,
        note: &str,
        manual: bool,
    ) -> (InvoiceStatus, InvoiceStatus) {
        let old_status = self.status;
        self.status = new_status;

        if old_status != new_status {
            let from = self
                .status_transition
                .as_ref()
                .map(|staged| staged.from)
                .unwrap_or(old_status);

            self.status_transition = Some(StatusTransition {
                from,
                to: new_status,
                note: note.to_string(),
                manual,
            });

            self.maybe_set_date_completed(Utc::now());
        }

        (old_status, new_status)
    }

    /// Takes the staged transition, resetting it so a recursive save cannot
    /// fire the same transition twice.
    pub fn take_status_transition(&mut self) -> Option<StatusTransition> {
        self.status_transition.take()
    }

    pub fn staged_transition(&self) -> Option<&StatusTransition> {
        self.status_transition.as_ref()
    }

    /// Stamps the completion date when the invoice first becomes paid.
    pub fn maybe_set_date_completed(&mut self, now: DateTime<Utc>) {
        if self.date_completed.is_none() && self.is_paid() {
            self.date_completed = Some(now);
        }
    }

    // -------------------------------------------------------------------------
    // Boolean queries
    // -------------------------------------------------------------------------

    pub fn is_parent(&self) -> bool {
        self.parent_id == 0
    }

    pub fn is_renewal(&self) -> bool {
        !self.is_parent()
    }

    /// True when a recurring item was added or this invoice is a renewal.
    pub fn is_recurring(&self) -> bool {
        self.is_renewal() || self.recurring_item.is_some()
    }

    pub fn is_taxable(&self) -> bool {
        !self.disable_taxes
    }

    /// Whether the invoice requires no payment at all.
    pub fn is_free(&mut self) -> bool {
        let mut is_free = self.initial_total() <= Decimal::ZERO;
        if is_free && self.is_recurring() {
            is_free = self.recurring_total() <= Decimal::ZERO;
        }
        is_free
    }

    pub fn is_paid(&self) -> bool {
        self.status.is_paid()
    }

    pub fn needs_payment(&mut self) -> bool {
        !self.is_paid() && !self.is_free()
    }

    pub fn is_refunded(&self) -> bool {
        self.status == InvoiceStatus::Refunded
    }

    pub fn is_draft(&self) -> bool {
        self.status.is_draft()
    }

    pub fn has_status(&self, statuses: &[InvoiceStatus]) -> bool {
        statuses.contains(&self.status)
    }

    pub fn is_type(&self, invoice_type: InvoiceType) -> bool {
        self.invoice_type == invoice_type
    }

    pub fn is_quote(&self) -> bool {
        self.is_type(InvoiceType::Quote)
    }

    /// A recurring invoice whose first charge is zero is a free trial,
    /// whether the item defines one or a discount produced it.
    pub fn has_free_trial(&mut self) -> bool {
        self.is_recurring() && self.initial_total() == Decimal::ZERO
    }

    pub fn is_initial_free(&mut self) -> bool {
        self.initial_total() <= Decimal::ZERO
    }

    pub fn item_has_free_trial(&self) -> bool {
        self.recurring()
            .map(|item| item.has_free_trial())
            .unwrap_or(false)
    }

    pub fn is_free_trial_from_discount(&mut self) -> bool {
        self.has_free_trial() && !self.item_has_free_trial()
    }
}

/// Persisted invoice row. Collections are stored as JSONB documents.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceRecord {
    pub invoice_id: i64,
    pub parent_id: i64,
    pub invoice_type: String,
    pub status: String,
    pub mode: String,
    pub template: String,
    pub invoice_key: String,
    pub invoice_number: String,
    pub path: String,
    pub description: Option<String>,
    pub currency: String,
    pub customer_id: i64,
    pub user_ip: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub company: Option<String>,
    pub vat_number: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub address: Option<String>,
    pub address_confirmed: bool,
    pub discount_code: Option<String>,
    pub disable_taxes: bool,
    pub subscription_id: Option<i64>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    pub date_completed: Option<DateTime<Utc>>,
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub total_fees: Decimal,
    pub items: Json<Vec<LineItem>>,
    pub fees: Json<BTreeMap<String, ChargeEntry>>,
    pub discounts: Json<BTreeMap<String, ChargeEntry>>,
    pub taxes: Json<BTreeMap<String, ChargeEntry>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::line_item::{BillingPeriod, RecurringTerms};

    fn draft() -> Invoice {
        Invoice::new_draft(&Config::default())
    }

    fn monthly(item_id: i64, price: i64) -> LineItem {
        LineItem::new(item_id, "Plan", Decimal::ONE, Decimal::from(price)).with_recurring(
            RecurringTerms {
                price: Decimal::from(price),
                period: BillingPeriod::Month,
                interval: 1,
                limit: 0,
                trial: None,
            },
        )
    }

    #[test]
    fn total_invariant_holds_for_both_buckets() {
        let mut invoice = draft();
        invoice.add_item(monthly(1, 100)).unwrap();
        invoice.add_discount("launch", Decimal::from(20), false);
        invoice.add_tax("vat", Decimal::from(8), true);
        invoice.add_fee("gateway", Decimal::from(3), false);

        // initial: 0 tax + 3 fee - 20 discount + 100 subtotal
        assert_eq!(invoice.initial_total(), Decimal::from(83));
        // recurring: 8 tax + 0 fee - 0 discount + 100 subtotal
        assert_eq!(invoice.recurring_total(), Decimal::from(108));
    }

    #[test]
    fn totals_floor_at_zero() {
        let mut invoice = draft();
        invoice
            .add_item(LineItem::new(1, "Cheap", Decimal::ONE, Decimal::from(5)))
            .unwrap();
        invoice.add_discount("huge", Decimal::from(50), false);
        assert_eq!(invoice.initial_total(), Decimal::ZERO);
    }

    #[test]
    fn renewal_selects_recurring_total() {
        let mut invoice = draft();
        invoice.add_item(monthly(1, 100)).unwrap();
        invoice.add_discount("first-cycle", Decimal::from(20), false);

        assert_eq!(invoice.total(), Decimal::from(80));

        invoice.parent_id = 77;
        invoice.recalculate_total();
        assert_eq!(invoice.total(), Decimal::from(100));
        assert_eq!(invoice.subtotal, Decimal::from(100));
    }

    #[test]
    fn last_recurring_item_wins() {
        let mut invoice = draft();
        invoice.add_item(monthly(1, 10)).unwrap();
        invoice.add_item(monthly(2, 20)).unwrap();

        assert_eq!(invoice.recurring_item_id(), Some(2));
        assert!(invoice.is_recurring());

        invoice.remove_item(2);
        assert_eq!(invoice.recurring_item_id(), None);
        // A previously added recurring item no longer marks the invoice.
        assert!(!invoice.is_recurring());
    }

    #[test]
    fn non_purchasable_items_are_rejected_without_mutation() {
        let mut invoice = draft();
        let mut item = LineItem::new(9, "Retired", Decimal::ONE, Decimal::from(10));
        item.purchasable = false;

        let err = invoice.add_item(item).unwrap_err();
        assert!(matches!(err, AppError::ItemNotPurchasable(_)));
        assert!(invoice.items().is_empty());
        assert!(!invoice.is_recurring());
    }

    #[test]
    fn charge_upserts_accumulate() {
        let mut invoice = draft();
        invoice.add_fee("gateway", Decimal::from(3), false);
        invoice.add_fee("gateway", Decimal::from(2), false);
        assert_eq!(invoice.get_fee("gateway").unwrap().amount, Decimal::from(5));
    }

    #[test]
    fn add_tax_is_a_noop_when_not_taxable() {
        let mut invoice = draft();
        invoice.disable_taxes = true;
        invoice.add_tax("vat", Decimal::from(10), true);
        assert!(invoice.taxes().is_empty());
        assert_eq!(invoice.recalculate_total_tax(), Decimal::ZERO);
    }

    #[test]
    fn setting_the_same_status_stages_nothing() {
        let mut invoice = draft();
        invoice.set_status(InvoiceStatus::Pending, "", false);
        assert!(invoice.staged_transition().is_none());
    }

    #[test]
    fn repeated_set_status_preserves_original_from() {
        let mut invoice = draft();
        invoice.set_status(InvoiceStatus::Failed, "", false);
        invoice.set_status(InvoiceStatus::Processing, "", false);
        invoice.set_status(InvoiceStatus::Paid, "", false);

        let staged = invoice.staged_transition().unwrap();
        assert_eq!(staged.from, InvoiceStatus::Pending);
        assert_eq!(staged.to, InvoiceStatus::Paid);
    }

    #[test]
    fn payment_completion_is_classified_from_unpaid_sources_only() {
        let paid = StatusTransition {
            from: InvoiceStatus::Pending,
            to: InvoiceStatus::Paid,
            note: String::new(),
            manual: false,
        };
        assert!(paid.is_payment_completion());

        let refund_reversal = StatusTransition {
            from: InvoiceStatus::Refunded,
            to: InvoiceStatus::Paid,
            note: String::new(),
            manual: false,
        };
        assert!(!refund_reversal.is_payment_completion());
    }

    #[test]
    fn becoming_paid_stamps_completion_once() {
        let mut invoice = draft();
        invoice.set_status(InvoiceStatus::Paid, "", false);
        let first = invoice.date_completed;
        assert!(first.is_some());

        invoice.set_status(InvoiceStatus::Pending, "", false);
        invoice.set_status(InvoiceStatus::Paid, "", false);
        assert_eq!(invoice.date_completed, first);
    }

    #[test]
    fn unknown_statuses_coerce_to_pending() {
        assert_eq!(InvoiceStatus::from_string("wpi-bogus"), InvoiceStatus::Pending);
        assert_eq!(InvoiceStatus::from_string("publish"), InvoiceStatus::Paid);
    }

    #[test]
    fn record_round_trip_rebuilds_recurring_item() {
        let mut invoice = draft();
        invoice.add_item(LineItem::new(1, "Setup", Decimal::ONE, Decimal::from(10))).unwrap();
        invoice.add_item(monthly(2, 30)).unwrap();
        invoice.recalculate_total();

        let rebuilt = Invoice::from_record(invoice.to_record());
        assert_eq!(rebuilt.recurring_item_id(), Some(2));
        assert_eq!(rebuilt.items().len(), 2);
        assert_eq!(rebuilt.status(), invoice.status());
    }

    #[test]
    fn free_trial_from_discount_is_detected() {
        let mut invoice = draft();
        invoice.add_item(monthly(1, 100)).unwrap();
        invoice.add_discount("free-first-month", Decimal::from(100), false);

        assert!(invoice.has_free_trial());
        assert!(!invoice.item_has_free_trial());
        assert!(invoice.is_free_trial_from_discount());
        // Still owes money on renewal, so not free.
        assert!(!invoice.is_free());
    }
}
