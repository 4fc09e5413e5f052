//! Invoice lifecycle tests against the in-memory store.

use async_trait::async_trait;
use billing_core::config::Config;
use billing_core::error::AppError;
use billing_core::events::Listener;
use invoicing::events::InvoiceEvents;
use invoicing::models::{BillingPeriod, LineItem, RecurringTerms};
use invoicing::{
    InMemoryInvoiceStore, InvoiceEvent, InvoiceService, InvoiceStatus, ResolvedDiscount,
    StaticDiscountResolver,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

/// Records the names of dispatched events, in order.
#[derive(Default)]
struct RecordingListener {
    seen: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Listener<InvoiceEvent> for RecordingListener {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, event: &InvoiceEvent) -> anyhow::Result<()> {
        let name = match event {
            InvoiceEvent::Created { .. } => "created",
            InvoiceEvent::Updated { .. } => "updated",
            InvoiceEvent::StatusChanged { transition, .. } => {
                self.seen.lock().unwrap().push(format!(
                    "status:{}->{}",
                    transition.from.as_str(),
                    transition.to.as_str()
                ));
                return Ok(());
            }
            InvoiceEvent::PaymentStatusChanged { .. } => "payment",
        };
        self.seen.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

struct FailingListener;

#[async_trait]
impl Listener<InvoiceEvent> for FailingListener {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn handle(&self, event: &InvoiceEvent) -> anyhow::Result<()> {
        if matches!(event, InvoiceEvent::StatusChanged { .. }) {
            anyhow::bail!("listener exploded");
        }
        Ok(())
    }
}

fn service() -> (InvoiceService, Arc<RecordingListener>) {
    let events = Arc::new(InvoiceEvents::new());
    let listener = Arc::new(RecordingListener::default());
    events.subscribe(listener.clone());

    let service = InvoiceService::new(
        Arc::new(InMemoryInvoiceStore::new()),
        events,
        Arc::new(StaticDiscountResolver::new()),
        Config::default(),
    );
    (service, listener)
}

fn plan(item_id: i64, price: i64) -> LineItem {
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
async fn first_save_assigns_identity() {
    let (service, listener) = service();

    let mut invoice = service.new_invoice();
    invoice.customer_id = 42;
    invoice.add_item(plan(1, 100)).unwrap();

    let invoice_id = service.save(&mut invoice).await.unwrap();

    assert_eq!(invoice_id, 1);
    assert_eq!(invoice.id, 1);
    assert_eq!(invoice.number, "INV-00001");
    assert_eq!(invoice.path, "inv-00001");
    assert_eq!(invoice.key.len(), 32);
    assert!(invoice.date_created.is_some());
    assert!(invoice.date_modified.is_some());
    assert_eq!(listener.seen(), vec!["created"]);

    let loaded = service.load(invoice_id).await.unwrap().unwrap();
    assert_eq!(loaded.number, "INV-00001");
    assert_eq!(loaded.subtotal, Decimal::from(100));
}

#[tokio::test]
async fn invoice_numbers_are_sequential() {
    let (service, _) = service();

    let mut first = service.new_invoice();
    let mut second = service.new_invoice();
    service.save(&mut first).await.unwrap();
    service.save(&mut second).await.unwrap();

    assert_eq!(first.number, "INV-00001");
    assert_eq!(second.number, "INV-00002");
}

#[tokio::test]
async fn becoming_paid_fires_status_and_payment_events_and_records_a_note() {
    let (service, listener) = service();

    let mut invoice = service.new_invoice();
    invoice.add_item(plan(1, 50)).unwrap();
    service.save(&mut invoice).await.unwrap();

    invoice.set_status(InvoiceStatus::Paid, "", false);
    service.save(&mut invoice).await.unwrap();

    assert_eq!(
        listener.seen(),
        vec!["created", "updated", "status:pending->paid", "payment"]
    );
    assert!(invoice.date_completed.is_some());

    let notes = service.notes(invoice.id).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].note, "Status changed from pending to paid.");
    assert!(notes[0].system);
}

#[tokio::test]
async fn transition_fires_once_per_save() {
    let (service, listener) = service();

    let mut invoice = service.new_invoice();
    service.save(&mut invoice).await.unwrap();

    invoice.set_status(InvoiceStatus::Paid, "", false);
    service.save(&mut invoice).await.unwrap();
    // Nothing staged; a plain re-save must not re-fire the transition.
    service.save(&mut invoice).await.unwrap();

    let status_events = listener
        .seen()
        .iter()
        .filter(|name| name.starts_with("status:"))
        .count();
    assert_eq!(status_events, 1);
}

#[tokio::test]
async fn paid_to_refunded_is_not_a_payment_completion() {
    let (service, listener) = service();

    let mut invoice = service.new_invoice();
    service.save(&mut invoice).await.unwrap();
    invoice.set_status(InvoiceStatus::Paid, "", false);
    service.save(&mut invoice).await.unwrap();

    let refunded = service.refund(invoice.id, "Chargeback").await.unwrap();
    assert_eq!(refunded.status(), InvoiceStatus::Refunded);

    let payment_events = listener
        .seen()
        .iter()
        .filter(|name| *name == "payment")
        .count();
    assert_eq!(payment_events, 1);

    let notes = service.notes(invoice.id).await.unwrap();
    assert_eq!(
        notes.last().unwrap().note,
        "Chargeback Status changed from paid to refunded."
    );
}

#[tokio::test]
async fn refund_of_unpaid_invoice_is_a_conflict() {
    let (service, _) = service();

    let mut invoice = service.new_invoice();
    service.save(&mut invoice).await.unwrap();

    let err = service.refund(invoice.id, "").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn listener_failures_are_recorded_and_do_not_abort_the_save() {
    let (service, _) = service();
    service.events().subscribe(Arc::new(FailingListener));

    let mut invoice = service.new_invoice();
    service.save(&mut invoice).await.unwrap();

    invoice.set_status(InvoiceStatus::Paid, "", false);
    service.save(&mut invoice).await.unwrap();

    let notes = service.notes(invoice.id).await.unwrap();
    assert!(notes.iter().any(|note| note
        .note
        .starts_with("Error during status transition. failing:")));
    // The save itself still landed the new status.
    let loaded = service.load(invoice.id).await.unwrap().unwrap();
    assert_eq!(loaded.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn update_status_of_missing_invoice_is_not_found() {
    let (service, _) = service();
    let err = service
        .update_status(999, InvoiceStatus::Paid, "")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn unknown_discount_codes_are_rejected() {
    let (service, _) = service();

    let mut invoice = service.new_invoice();
    invoice.add_item(plan(1, 100)).unwrap();

    let err = service
        .apply_discount_code(&mut invoice, "NOPE", Decimal::from(10))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidDiscount(_)));
    assert!(invoice.discount_code.is_none());
}

#[tokio::test]
async fn recurring_discount_codes_apply_to_renewals() {
    let events = Arc::new(InvoiceEvents::new());
    let resolver = Arc::new(StaticDiscountResolver::new());
    resolver.register(
        "FOREVER10",
        ResolvedDiscount {
            active: true,
            recurring: true,
        },
    );
    let service = InvoiceService::new(
        Arc::new(InMemoryInvoiceStore::new()),
        events,
        resolver,
        Config::default(),
    );

    let mut invoice = service.new_invoice();
    invoice.add_item(plan(1, 100)).unwrap();
    service
        .apply_discount_code(&mut invoice, "FOREVER10", Decimal::from(10))
        .await
        .unwrap();

    assert_eq!(invoice.initial_total(), Decimal::from(90));
    assert_eq!(invoice.recurring_total(), Decimal::from(90));
}
