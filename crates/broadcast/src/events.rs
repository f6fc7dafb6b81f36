//! Inbound event fan-out.
//!
//! The transport publishes every inbound event to an [`EventSource`];
//! interested components subscribe a listener and hold on to the returned
//! [`Subscription`]. Dropping or cancelling the handle unsubscribes.

use std::sync::{
    Arc, RwLock, Weak,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    tracing::{debug, warn},
};

use crate::{Result, types::TargetId};

/// One event coming in from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Where the event came from; the broadcast target it maps to.
    pub origin: TargetId,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
}

impl InboundEvent {
    pub fn from_origin(origin: TargetId) -> Self {
        Self {
            origin,
            sender_id: None,
            text: None,
        }
    }
}

/// Receives inbound events while subscribed.
#[async_trait]
pub trait EventListener: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &InboundEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Something listeners can subscribe to.
pub trait EventSource: Send + Sync {
    /// Register `listener`. The returned handle is the only way to remove it.
    fn subscribe(self: Arc<Self>, listener: Arc<dyn EventListener>) -> Subscription;

    /// Remove a subscription. Returns `false` if it was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn is_subscribed(&self, id: SubscriptionId) -> bool;
}

/// Handle to one listener registration.
///
/// Unsubscribes on drop; [`Subscription::cancel`] does the same eagerly.
pub struct Subscription {
    id: SubscriptionId,
    source: Weak<dyn EventSource>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, source: Weak<dyn EventSource>) -> Self {
        Self { id, source }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the source still delivers to this subscription.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.source
            .upgrade()
            .is_some_and(|source| source.is_subscribed(self.id))
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.unsubscribe(self.id);
        }
    }
}

type Entry = (SubscriptionId, Arc<dyn EventListener>);

/// In-process [`EventSource`]: the transport calls [`ListenerRegistry::dispatch`]
/// for every inbound event.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Hand `event` to every current listener concurrently. Listener errors
    /// are logged and do not affect the other listeners.
    pub async fn dispatch(&self, event: &InboundEvent) {
        let listeners: Vec<Arc<dyn EventListener>> = {
            let guard = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        if listeners.is_empty() {
            return;
        }

        debug!(origin = %event.origin, count = listeners.len(), "dispatching inbound event");

        let results = futures::future::join_all(listeners.iter().map(|listener| async move {
            (listener.name().to_string(), listener.on_event(event).await)
        }))
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                warn!(listener = %name, origin = %event.origin, error = %e, "event listener failed");
            }
        }
    }
}

impl EventSource for ListenerRegistry {
    fn subscribe(self: Arc<Self>, listener: Arc<dyn EventListener>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(listener = listener.name(), "listener subscribed");
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        let weak: Weak<dyn EventSource> = Arc::downgrade(&(self as Arc<dyn EventSource>));
        Subscription::new(id, weak)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(sid, _)| *sid == id)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::Error,
        std::sync::atomic::AtomicUsize,
    };

    struct Counting {
        seen: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventListener for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_event(&self, _event: &InboundEvent) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::message("nope"));
            }
            Ok(())
        }
    }

    fn counting(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            seen: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn dispatch_reaches_all_listeners() {
        let registry = ListenerRegistry::new();
        let ok = counting(false);
        let failing = counting(true);
        let _a = Arc::clone(&registry).subscribe(Arc::clone(&ok) as Arc<dyn EventListener>);
        let _b = Arc::clone(&registry).subscribe(Arc::clone(&failing) as Arc<dyn EventListener>);

        registry.dispatch(&InboundEvent::from_origin(TargetId(1))).await;
        assert_eq!(ok.seen.load(Ordering::SeqCst), 1);
        assert_eq!(failing.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_unsubscribes() {
        let registry = ListenerRegistry::new();
        let listener = counting(false);
        let sub = Arc::clone(&registry).subscribe(Arc::clone(&listener) as Arc<dyn EventListener>);
        assert!(sub.is_active());
        assert_eq!(registry.listener_count(), 1);

        let id = sub.id();
        sub.cancel();
        assert_eq!(registry.listener_count(), 0);
        assert!(!registry.unsubscribe(id));

        registry.dispatch(&InboundEvent::from_origin(TargetId(1))).await;
        assert_eq!(listener.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_outliving_source_is_inert() {
        let registry = ListenerRegistry::new();
        let sub = Arc::clone(&registry).subscribe(counting(false));
        drop(registry);
        assert!(!sub.is_active());
        drop(sub);
    }
}
