//! In-process notification bus.
//!
//! Collaborators subscribe [`Listener`] implementations to an [`EventBus`].
//! Dispatch isolates listeners from each other: a failing listener never
//! aborts the operation that emitted the event. Each invocation's outcome is
//! returned to the emitter so it can record failures (e.g. as audit notes).

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::warn;

#[async_trait]
pub trait Listener<E>: Send + Sync
where
    E: Send + Sync,
{
    /// Stable name used in logs and audit notes.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

/// Result of invoking a single listener.
pub struct DispatchOutcome {
    pub listener: &'static str,
    pub result: anyhow::Result<()>,
}

impl DispatchOutcome {
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

pub struct EventBus<E>
where
    E: Send + Sync,
{
    listeners: RwLock<Vec<Arc<dyn Listener<E>>>>,
}

impl<E> Default for EventBus<E>
where
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E>
where
    E: Send + Sync,
{
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn Listener<E>>) {
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push(listener);
    }

    /// Deliver an event to every listener in subscription order.
    ///
    /// Failures are logged and captured, never propagated.
    pub async fn dispatch(&self, event: &E) -> Vec<DispatchOutcome> {
        let listeners: Vec<Arc<dyn Listener<E>>> = self
            .listeners
            .read()
            .expect("listener registry poisoned")
            .clone();

        let mut outcomes = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let result = listener.handle(event).await;
            if let Err(err) = &result {
                warn!(listener = listener.name(), error = %err, "event listener failed");
            }
            outcomes.push(DispatchOutcome {
                listener: listener.name(),
                result,
            });
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Listener<u32> for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &u32) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Listener<u32> for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _event: &u32) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_all_listeners_despite_failures() {
        let bus: EventBus<u32> = EventBus::new();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(counting.clone());

        let outcomes = bus.dispatch(&7).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_err());
        assert!(!outcomes[1].is_err());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
