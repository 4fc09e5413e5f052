//! Subscription lifecycle orchestration.

use crate::events::{SubscriptionEvent, SubscriptionEvents};
use crate::models::{Subscription, SubscriptionStatus};
use crate::services::metrics::{RENEWALS_TOTAL, SUBSCRIPTIONS_TOTAL};
use crate::store::SubscriptionStore;
use billing_core::error::AppError;
use chrono::Utc;
use invoicing::models::{Invoice, InvoiceStatus};
use invoicing::InvoiceService;
use std::sync::Arc;
use tracing::{info, instrument};

/// Saves subscriptions, enforces cancellation rules and records renewals.
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    events: Arc<SubscriptionEvents>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn SubscriptionStore>, events: Arc<SubscriptionEvents>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<SubscriptionEvents> {
        &self.events
    }

    #[instrument(skip(self))]
    pub async fn load(&self, subscription_id: i64) -> Result<Option<Subscription>, AppError> {
        let record = self.store.fetch(subscription_id).await?;
        Ok(record.map(Subscription::from_record))
    }

    #[instrument(skip(self))]
    pub async fn find_by_parent_invoice(
        &self,
        parent_invoice_id: i64,
    ) -> Result<Option<Subscription>, AppError> {
        let record = self.store.find_by_parent_invoice(parent_invoice_id).await?;
        Ok(record.map(Subscription::from_record))
    }

    /// The subscription behind an invoice.
    ///
    /// Renewal invoices carry no subscription of their own; they resolve to
    /// their parent invoice's subscription.
    #[instrument(skip(self, invoice), fields(invoice_id = invoice.id))]
    pub async fn for_invoice(&self, invoice: &Invoice) -> Result<Option<Subscription>, AppError> {
        let parent_invoice_id = if invoice.is_renewal() {
            invoice.parent_id
        } else {
            invoice.id
        };
        self.find_by_parent_invoice(parent_invoice_id).await
    }

    /// Persist the subscription and fire the events the save produced.
    #[instrument(skip(self, subscription), fields(subscription_id = subscription.id))]
    pub async fn save(&self, subscription: &mut Subscription) -> Result<i64, AppError> {
        if subscription.date_created.is_none() {
            subscription.date_created = Some(Utc::now());
        }

        let is_new = subscription.id == 0;
        if is_new {
            let subscription_id = self.store.insert(&subscription.to_record()).await?;
            subscription.id = subscription_id;

            SUBSCRIPTIONS_TOTAL
                .with_label_values(&[subscription.status().as_str()])
                .inc();
            info!(
                subscription_id = subscription.id,
                parent_invoice_id = subscription.parent_invoice_id,
                "Subscription created"
            );
            self.events
                .dispatch(&SubscriptionEvent::Created {
                    subscription: subscription.clone(),
                })
                .await;
        } else {
            self.store.update(&subscription.to_record()).await?;
        }

        if let Some(transition) = subscription.take_status_transition() {
            info!(
                subscription_id = subscription.id,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "Subscription status changed"
            );
            self.events
                .dispatch(&SubscriptionEvent::StatusChanged {
                    subscription: subscription.clone(),
                    from: transition.from,
                    to: transition.to,
                })
                .await;
        }

        Ok(subscription.id)
    }

    /// Move a subscription to a new status and save, in one step.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        subscription_id: i64,
        new_status: SubscriptionStatus,
    ) -> Result<Subscription, AppError> {
        let mut subscription = self.load(subscription_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Subscription {} does not exist",
                subscription_id
            ))
        })?;

        subscription.set_status(new_status);
        self.save(&mut subscription).await?;
        Ok(subscription)
    }

    /// Cancel a subscription on behalf of a customer.
    ///
    /// `customer_id` is the authenticated caller; pass `None` for
    /// administrative cancellation.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        subscription_id: i64,
        customer_id: Option<i64>,
    ) -> Result<Subscription, AppError> {
        let mut subscription = self.load(subscription_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Subscription {} does not exist",
                subscription_id
            ))
        })?;

        if let Some(customer_id) = customer_id {
            if subscription.customer_id != customer_id {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Subscription {} does not belong to customer {}",
                    subscription_id,
                    customer_id
                )));
            }
        }

        if !subscription.can_cancel() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription {} is {} and cannot be cancelled",
                subscription_id,
                subscription.status().as_str()
            )));
        }

        subscription.set_status(SubscriptionStatus::Cancelled);
        self.save(&mut subscription).await?;
        Ok(subscription)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, subscription_id: i64) -> Result<bool, AppError> {
        let deleted = self.store.delete(subscription_id).await?;
        if deleted {
            info!(subscription_id = subscription_id, "Subscription deleted");
        }
        Ok(deleted)
    }

    /// Record a successful renewal charge.
    ///
    /// Creates a renewal invoice under the parent, marks it paid, then either
    /// advances the next renewal date or expires the subscription once the
    /// payment cap is reached. The initial payment counts against the cap.
    #[instrument(skip(self, invoices))]
    pub async fn renew(
        &self,
        subscription_id: i64,
        invoices: &InvoiceService,
    ) -> Result<Invoice, AppError> {
        let mut subscription = self.load(subscription_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Subscription {} does not exist",
                subscription_id
            ))
        })?;

        let parent = invoices
            .load(subscription.parent_invoice_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Parent invoice {} of subscription {} does not exist",
                    subscription.parent_invoice_id,
                    subscription_id
                ))
            })?;

        let mut renewal = parent.create_renewal();
        renewal.subscription_id = Some(subscription.id);
        renewal.set_status(InvoiceStatus::Renewal, "Renewal payment.", false);
        invoices.save(&mut renewal).await?;

        let times_billed = 1 + invoices.count_renewals(parent.id).await?;
        if subscription.bill_times > 0 && times_billed >= subscription.bill_times {
            subscription.set_status(SubscriptionStatus::Expired);
            subscription.next_renewal_date = None;
            RENEWALS_TOTAL.with_label_values(&["expired"]).inc();
        } else {
            subscription.set_status(SubscriptionStatus::Active);
            let base = subscription.next_renewal_date.unwrap_or_else(Utc::now);
            subscription.next_renewal_date = Some(subscription.next_renewal_after(base));
            RENEWALS_TOTAL.with_label_values(&["renewed"]).inc();
        }
        self.save(&mut subscription).await?;

        Ok(renewal)
    }
}
