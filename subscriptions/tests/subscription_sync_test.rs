//! Invoice-to-subscription synchronization tests.

use billing_core::config::Config;
use invoicing::events::InvoiceEvents;
use invoicing::models::{BillingPeriod, LineItem, RecurringTerms, TrialTerms};
use invoicing::{
    InMemoryInvoiceStore, InvoiceService, InvoiceStatus, InvoiceStore, StaticDiscountResolver,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use subscriptions::events::SubscriptionEvents;
use subscriptions::{
    InMemorySubscriptionStore, SubscriptionService, SubscriptionStatus, SubscriptionSynchronizer,
};

fn wiring() -> (InvoiceService, Arc<SubscriptionService>) {
    let invoice_store: Arc<dyn InvoiceStore> = Arc::new(InMemoryInvoiceStore::new());
    let invoice_events = Arc::new(InvoiceEvents::new());

    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::new(InMemorySubscriptionStore::new()),
        Arc::new(SubscriptionEvents::new()),
    ));
    invoice_events.subscribe(Arc::new(SubscriptionSynchronizer::new(
        subscriptions.clone(),
        invoice_store.clone(),
    )));

    let invoices = InvoiceService::new(
        invoice_store,
        invoice_events,
        Arc::new(StaticDiscountResolver::new()),
        Config::default(),
    );
    (invoices, subscriptions)
}

fn monthly_plan(item_id: i64, price: i64) -> LineItem {
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

#[tokio::test]
async fn saving_a_recurring_invoice_creates_a_pending_subscription() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.customer_id = 42;
    invoice.add_item(monthly_plan(7, 100)).unwrap();
    invoices.save(&mut invoice).await.unwrap();

    let subscription = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .expect("subscription should exist");

    assert_eq!(subscription.status(), SubscriptionStatus::Pending);
    assert_eq!(subscription.customer_id, 42);
    assert_eq!(subscription.product_id, 7);
    assert_eq!(subscription.period, BillingPeriod::Month);
    assert_eq!(subscription.frequency, 1);
    assert_eq!(subscription.initial_amount, Decimal::from(100));
    assert_eq!(subscription.recurring_amount, Decimal::from(100));
    assert!(subscription.next_renewal_date.is_some());

    // The invoice row points back at the subscription.
    let record = invoices.store().fetch(invoice.id).await.unwrap().unwrap();
    assert_eq!(record.subscription_id, Some(subscription.id));
}

#[tokio::test]
async fn non_recurring_invoices_get_no_subscription() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice
        .add_item(LineItem::new(1, "One-off", Decimal::ONE, Decimal::from(50)))
        .unwrap();
    invoices.save(&mut invoice).await.unwrap();

    assert!(subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn fully_free_invoices_get_no_subscription() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.add_item(monthly_plan(1, 0)).unwrap();
    invoices.save(&mut invoice).await.unwrap();

    assert!(subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn payment_completion_activates_the_subscription() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.add_item(monthly_plan(1, 100)).unwrap();
    invoices.save(&mut invoice).await.unwrap();

    invoice.set_status(InvoiceStatus::Paid, "", false);
    invoices.save(&mut invoice).await.unwrap();

    let subscription = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Active);
}

#[tokio::test]
async fn item_trials_start_the_subscription_trialling() {
    let (invoices, subscriptions) = wiring();

    let item = LineItem::new(1, "Plan", Decimal::ONE, Decimal::ZERO).with_recurring(
        RecurringTerms {
            price: Decimal::from(30),
            period: BillingPeriod::Month,
            interval: 1,
            limit: 0,
            trial: Some(TrialTerms {
                interval: 2,
                period: BillingPeriod::Week,
            }),
        },
    );

    let mut invoice = invoices.new_invoice();
    invoice.add_item(item).unwrap();
    invoices.save(&mut invoice).await.unwrap();

    let subscription = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Trialling);
    assert_eq!(
        subscription.trial_period,
        Some(TrialTerms {
            interval: 2,
            period: BillingPeriod::Week,
        })
    );

    // Trial renewal is two weeks out, not a month.
    let created = subscription.date_created.unwrap();
    let next = subscription.next_renewal_date.unwrap();
    assert_eq!(next - created, chrono::Duration::weeks(2));
}

#[tokio::test]
async fn a_discount_that_zeroes_the_first_charge_synthesizes_a_trial() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.add_item(monthly_plan(1, 100)).unwrap();
    invoice.add_discount("free-first-month", Decimal::from(100), false);
    invoices.save(&mut invoice).await.unwrap();

    let subscription = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Trialling);
    // Synthetic trial covers exactly one billing cycle.
    assert_eq!(
        subscription.trial_period,
        Some(TrialTerms {
            interval: 1,
            period: BillingPeriod::Month,
        })
    );
    assert_eq!(subscription.initial_amount, Decimal::ZERO);
    assert_eq!(subscription.recurring_amount, Decimal::from(100));
}

#[tokio::test]
async fn dropping_the_recurring_item_tears_the_subscription_down() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.add_item(monthly_plan(3, 100)).unwrap();
    invoices.save(&mut invoice).await.unwrap();

    let subscription_id = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap()
        .id;

    invoice.remove_item(3);
    invoice
        .add_item(LineItem::new(4, "One-off", Decimal::ONE, Decimal::from(10)))
        .unwrap();
    invoices.save(&mut invoice).await.unwrap();

    assert!(subscriptions.load(subscription_id).await.unwrap().is_none());
    let record = invoices.store().fetch(invoice.id).await.unwrap().unwrap();
    assert_eq!(record.subscription_id, None);
}

#[tokio::test]
async fn failed_invoices_push_active_subscriptions_back_to_pending() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.add_item(monthly_plan(1, 100)).unwrap();
    invoices.save(&mut invoice).await.unwrap();

    invoice.set_status(InvoiceStatus::Paid, "", false);
    invoices.save(&mut invoice).await.unwrap();

    invoice.set_status(InvoiceStatus::Failed, "", false);
    invoices.save(&mut invoice).await.unwrap();

    let subscription = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Pending);
}

#[tokio::test]
async fn settled_invoices_do_not_resync_their_subscription() {
    let (invoices, subscriptions) = wiring();

    let mut invoice = invoices.new_invoice();
    invoice.add_item(monthly_plan(1, 100)).unwrap();
    invoices.save(&mut invoice).await.unwrap();
    invoice.set_status(InvoiceStatus::Paid, "", false);
    invoices.save(&mut invoice).await.unwrap();

    let before = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap();

    // A paid invoice re-save must not rewrite subscription terms.
    invoice.add_fee("late", Decimal::from(5), false);
    invoices.save(&mut invoice).await.unwrap();

    let after = subscriptions
        .find_by_parent_invoice(invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.recurring_amount, before.recurring_amount);
    assert_eq!(after.status(), before.status());
}
