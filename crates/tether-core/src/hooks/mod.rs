// Hook bus: in-process fan-out of lifecycle events
//
// The bus owns no durable state. Subscribers receive events in
// registration order; the first subscriber error aborts delivery of that
// event. After a subscription is closed the subscriber receives nothing.

pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use tether_contracts::HookEvent;

/// Error returned by a subscriber, aborting delivery of the event
#[derive(Debug, Clone, Error)]
#[error("hook subscriber error: {0}")]
pub struct HookError(pub String);

/// Receives lifecycle events published during run execution.
///
/// Subscribers run inside the hook-publishing activity and may do I/O.
#[async_trait]
pub trait HookSubscriber: Send + Sync {
    async fn on_event(&self, event: &HookEvent) -> Result<(), HookError>;
}

/// Function adapter for simple subscribers
pub struct FnSubscriber<F>
where
    F: Fn(&HookEvent) -> Result<(), HookError> + Send + Sync,
{
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&HookEvent) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> HookSubscriber for FnSubscriber<F>
where
    F: Fn(&HookEvent) -> Result<(), HookError> + Send + Sync,
{
    async fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        (self.f)(event)
    }
}

/// Test helper collecting every received event
#[derive(Default)]
pub struct CollectingSubscriber {
    events: Mutex<Vec<HookEvent>>,
}

impl CollectingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far
    pub fn collected(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl HookSubscriber for CollectingSubscriber {
    async fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct Registration {
    subscriber: Arc<dyn HookSubscriber>,
    closed: Arc<AtomicBool>,
}

/// Handle closing one registration
pub struct Subscription {
    closed: Arc<AtomicBool>,
}

impl Subscription {
    /// Stop delivery to the subscriber. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-process fan-out of hook events
#[derive(Default)]
pub struct HookBus {
    registrations: RwLock<Vec<Registration>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; events arrive in registration order
    pub fn register(&self, subscriber: Arc<dyn HookSubscriber>) -> Subscription {
        let closed = Arc::new(AtomicBool::new(false));
        self.registrations.write().push(Registration {
            subscriber,
            closed: closed.clone(),
        });
        Subscription { closed }
    }

    /// Deliver one event to all live subscribers, in registration order.
    /// The first subscriber error aborts remaining delivery.
    pub async fn publish(&self, event: &HookEvent) -> Result<(), HookError> {
        let live: Vec<Arc<dyn HookSubscriber>> = {
            let mut registrations = self.registrations.write();
            registrations.retain(|r| !r.closed.load(Ordering::SeqCst));
            registrations.iter().map(|r| r.subscriber.clone()).collect()
        };

        for subscriber in live {
            subscriber.on_event(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_contracts::{AgentId, HookPayload, RunId};

    fn event(run: &str) -> HookEvent {
        HookEvent::new(
            RunId::new(run),
            AgentId::new("svc.agent"),
            None,
            Utc::now(),
            HookPayload::RunStarted,
        )
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = HookBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        let _s1 = bus.register(Arc::new(FnSubscriber::new(move |_| {
            first.lock().push("first");
            Ok(())
        })));
        let second = order.clone();
        let _s2 = bus.register(Arc::new(FnSubscriber::new(move |_| {
            second.lock().push("second");
            Ok(())
        })));

        bus.publish(&event("r1")).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_first_error_aborts_delivery() {
        let bus = HookBus::new();
        let _failing = bus.register(Arc::new(FnSubscriber::new(|_| {
            Err(HookError("nope".into()))
        })));
        let collector = Arc::new(CollectingSubscriber::new());
        let _s = bus.register(collector.clone());

        let result = bus.publish(&event("r1")).await;

        assert!(result.is_err());
        assert!(collector.collected().is_empty());
    }

    #[tokio::test]
    async fn test_closed_subscription_receives_nothing() {
        let bus = HookBus::new();
        let collector = Arc::new(CollectingSubscriber::new());
        let subscription = bus.register(collector.clone());

        bus.publish(&event("r1")).await.unwrap();
        subscription.close();
        bus.publish(&event("r2")).await.unwrap();

        let received = collector.collected();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].run_id.as_str(), "r1");
    }

    #[tokio::test]
    async fn test_subsequence_property() {
        // A subscriber registered between publishes sees exactly the
        // events published while it was registered.
        let bus = HookBus::new();
        bus.publish(&event("r1")).await.unwrap();

        let collector = Arc::new(CollectingSubscriber::new());
        let subscription = bus.register(collector.clone());
        bus.publish(&event("r2")).await.unwrap();
        bus.publish(&event("r3")).await.unwrap();
        subscription.close();
        bus.publish(&event("r4")).await.unwrap();

        let ids: Vec<String> = collector
            .collected()
            .iter()
            .map(|e| e.run_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }
}
