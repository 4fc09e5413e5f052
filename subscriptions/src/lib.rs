//! Recurring billing on top of the invoice engine.
//!
//! A [`services::SubscriptionSynchronizer`] listens on the invoice event bus
//! and keeps one subscription per recurring parent invoice; the
//! [`services::SubscriptionService`] enforces cancellation rules and records
//! renewal charges as child invoices.

pub mod events;
pub mod models;
pub mod services;
pub mod store;

pub use events::SubscriptionEvent;
pub use models::{Subscription, SubscriptionRecord, SubscriptionStatus, SubscriptionTransition};
pub use services::{SubscriptionService, SubscriptionSynchronizer};
pub use store::{InMemorySubscriptionStore, PgSubscriptionStore, SubscriptionStore};
