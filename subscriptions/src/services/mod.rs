pub mod metrics;
mod subscriptions;
mod synchronizer;

pub use subscriptions::SubscriptionService;
pub use synchronizer::SubscriptionSynchronizer;
