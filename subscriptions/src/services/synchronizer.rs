//! Keeps subscriptions in sync with their parent invoices.
//!
//! Subscribed to the invoice event bus; every invoice save flows through
//! here. The synchronizer owns the invoice's `subscription_id` linkage and
//! updates it through a targeted store write rather than a full invoice save,
//! so handling an event never re-fires invoice events.

use crate::models::{Subscription, SubscriptionStatus};
use crate::services::SubscriptionService;
use async_trait::async_trait;
use billing_core::error::AppError;
use billing_core::events::Listener;
use invoicing::models::{Invoice, InvoiceStatus, InvoiceType, TrialTerms};
use invoicing::store::InvoiceStore;
use invoicing::InvoiceEvent;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Statuses that deactivate an active subscription when the parent invoice
/// lands on them.
const DEACTIVATING: &[InvoiceStatus] = &[
    InvoiceStatus::Refunded,
    InvoiceStatus::Failed,
    InvoiceStatus::Cancelled,
    InvoiceStatus::Pending,
];

pub struct SubscriptionSynchronizer {
    subscriptions: Arc<SubscriptionService>,
    invoices: Arc<dyn InvoiceStore>,
}

impl SubscriptionSynchronizer {
    pub fn new(subscriptions: Arc<SubscriptionService>, invoices: Arc<dyn InvoiceStore>) -> Self {
        Self {
            subscriptions,
            invoices,
        }
    }

    /// Create or update the subscription backing a parent invoice.
    async fn sync_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        // Renewal invoices never carry their own subscription.
        if invoice.is_renewal() {
            return Ok(());
        }

        let mut invoice = invoice.clone();
        let existing = self
            .subscriptions
            .find_by_parent_invoice(invoice.id)
            .await?;

        match existing {
            None => {
                if !invoice.is_recurring() || invoice.is_free() {
                    return Ok(());
                }
                let subscription = Subscription::new(invoice.customer_id, invoice.id);
                self.apply_invoice(subscription, &mut invoice).await
            }
            Some(subscription) => {
                // A settled invoice no longer drives its subscription.
                if invoice.is_paid() || invoice.is_refunded() {
                    return Ok(());
                }
                self.apply_invoice(subscription, &mut invoice).await
            }
        }
    }

    /// Copy the invoice's recurring terms onto the subscription and save it,
    /// or tear the subscription down when the invoice stopped qualifying.
    async fn apply_invoice(
        &self,
        mut subscription: Subscription,
        invoice: &mut Invoice,
    ) -> Result<(), AppError> {
        if !invoice.is_type(InvoiceType::Invoice) || invoice.is_free() || !invoice.is_recurring() {
            return self.tear_down(&subscription, invoice.id).await;
        }

        subscription.customer_id = invoice.customer_id;
        subscription.parent_invoice_id = invoice.id;
        subscription.initial_amount = invoice.initial_total();
        subscription.recurring_amount = invoice.recurring_total();
        subscription.date_created = Some(Utc::now());
        subscription.set_status(if invoice.is_paid() {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Pending
        });

        let item = match invoice.recurring() {
            Some(item) => item.clone(),
            None => return self.tear_down(&subscription, invoice.id).await,
        };
        // Items only enter through the recurring tracker, so terms exist.
        let terms = match &item.recurring {
            Some(terms) => terms.clone(),
            None => return self.tear_down(&subscription, invoice.id).await,
        };

        subscription.product_id = item.item_id;
        subscription.period = terms.period;
        subscription.frequency = terms.interval.max(1);
        subscription.bill_times = terms.limit;

        // A free trial comes from the item's own terms, or synthetically from
        // a discount that zeroed the first charge. Either way the first cycle
        // is unbilled.
        subscription.trial_period = None;
        if let Some(trial) = terms.trial {
            subscription.trial_period = Some(trial);
            subscription.set_status(SubscriptionStatus::Trialling);
        } else if invoice.has_free_trial() {
            subscription.trial_period = Some(TrialTerms {
                interval: terms.interval.max(1),
                period: terms.period,
            });
            subscription.set_status(SubscriptionStatus::Trialling);
        }

        let created = subscription.date_created.unwrap_or_else(Utc::now);
        subscription.next_renewal_date = Some(subscription.next_renewal_after(created));

        self.subscriptions.save(&mut subscription).await?;

        if invoice.subscription_id != Some(subscription.id) {
            self.invoices
                .set_subscription_id(invoice.id, Some(subscription.id))
                .await?;
        }

        debug!(
            invoice_id = invoice.id,
            subscription_id = subscription.id,
            "Subscription synchronized"
        );
        Ok(())
    }

    /// Remove a subscription whose invoice stopped qualifying, clearing the
    /// invoice's linkage.
    async fn tear_down(&self, subscription: &Subscription, invoice_id: i64) -> Result<(), AppError> {
        if subscription.id > 0 {
            self.subscriptions.delete(subscription.id).await?;
            info!(
                invoice_id = invoice_id,
                subscription_id = subscription.id,
                "Subscription removed, invoice no longer recurring"
            );
        }
        self.invoices.set_subscription_id(invoice_id, None).await?;
        Ok(())
    }

    /// Push an active subscription back to pending when its invoice falls out
    /// of a paid status.
    async fn maybe_deactivate(&self, invoice: &Invoice, to: InvoiceStatus) -> Result<(), AppError> {
        if !DEACTIVATING.contains(&to) {
            return Ok(());
        }

        if let Some(mut subscription) = self.subscriptions.for_invoice(invoice).await? {
            if subscription.is_active() {
                subscription.set_status(SubscriptionStatus::Pending);
                self.subscriptions.save(&mut subscription).await?;
            }
        }
        Ok(())
    }

    /// Activate the subscription when the initial payment completes.
    async fn maybe_activate(&self, invoice: &Invoice) -> Result<(), AppError> {
        if invoice.is_renewal() {
            return Ok(());
        }

        if let Some(mut subscription) = self.subscriptions.find_by_parent_invoice(invoice.id).await?
        {
            let next = if subscription.has_trial_period() {
                SubscriptionStatus::Trialling
            } else {
                SubscriptionStatus::Active
            };
            if subscription.status() != next {
                subscription.set_status(next);
                self.subscriptions.save(&mut subscription).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Listener<InvoiceEvent> for SubscriptionSynchronizer {
    fn name(&self) -> &'static str {
        "subscription-synchronizer"
    }

    async fn handle(&self, event: &InvoiceEvent) -> anyhow::Result<()> {
        match event {
            InvoiceEvent::Created { invoice } | InvoiceEvent::Updated { invoice } => {
                self.sync_invoice(invoice).await?;
            }
            InvoiceEvent::StatusChanged {
                invoice,
                transition,
            } => {
                self.maybe_deactivate(invoice, transition.to).await?;
            }
            InvoiceEvent::PaymentStatusChanged { invoice, .. } => {
                self.maybe_activate(invoice).await?;
            }
        }
        Ok(())
    }
}
