//! Subscription events.

use crate::models::{Subscription, SubscriptionStatus};
use billing_core::events::EventBus;

/// Events emitted by [`crate::services::SubscriptionService::save`].
#[derive(Clone)]
pub enum SubscriptionEvent {
    Created {
        subscription: Subscription,
    },
    StatusChanged {
        subscription: Subscription,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
}

pub type SubscriptionEvents = EventBus<SubscriptionEvent>;
