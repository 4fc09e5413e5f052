//! Domain models for the subscriptions crate.

mod subscription;

pub use subscription::{
    Subscription, SubscriptionRecord, SubscriptionStatus, SubscriptionTransition,
};
