//! Event bus delivering events to listeners.
//!
//! Delivery is synchronous: [`EventBus::emit`] invokes every matching
//! listener, in subscription order, on the caller's thread before returning.
//! The listener set is snapshotted when emission starts, so a listener that
//! subscribes or unsubscribes during delivery affects only later emissions.
//!
//! **Re-entrancy hazard:** a listener may emit further events. Nested
//! emissions are delivered immediately, before the outer emission reaches its
//! remaining listeners, and each nesting level adds a stack frame. Nesting is
//! capped at [`EventBus::max_depth`]; deeper emissions are dropped with a
//! warning.
//!
//! Every event is also broadcast to async [`EventReceiver`]s, for consumers
//! that should not run on the emitter's thread.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::PanelEvent;

/// Default channel capacity for async receivers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default bound on nested emissions.
pub const DEFAULT_MAX_EMIT_DEPTH: usize = 8;

/// Callback invoked for each delivered event.
pub type Listener = Arc<dyn Fn(&PanelEvent) + Send + Sync>;

thread_local! {
    static EMIT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Resets the nesting counter even if a listener unwinds past `emit`.
struct DepthGuard;

impl DepthGuard {
    fn enter(max: usize) -> Option<Self> {
        EMIT_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= max {
                return None;
            }
            depth.set(current.saturating_add(1));
            Some(Self)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EMIT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether an event name matches a subscription pattern.
///
/// Patterns are an exact name, `*` for everything, or a prefix ending in `*`
/// such as `template:*`.
#[must_use]
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => event_type.starts_with(prefix),
        None => pattern == event_type,
    }
}

struct Entry {
    id: u64,
    pattern: String,
    listener: Listener,
}

struct Inner {
    listeners: RwLock<Vec<Entry>>,
    sender: broadcast::Sender<Arc<PanelEvent>>,
    next_id: AtomicU64,
    capacity: usize,
    max_depth: usize,
}

/// Multi-listener publish/subscribe hub.
///
/// Clones share listeners and receivers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a new event bus with default capacity and nesting bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_EMIT_DEPTH)
    }

    /// Create a new event bus with the given receiver capacity and nesting
    /// bound. Zero values fall back to the defaults.
    #[must_use]
    pub fn with_limits(capacity: usize, max_depth: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            capacity
        };
        let max_depth = if max_depth == 0 {
            DEFAULT_MAX_EMIT_DEPTH
        } else {
            max_depth
        };
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                listeners: RwLock::new(Vec::new()),
                sender,
                next_id: AtomicU64::new(0),
                capacity,
                max_depth,
            }),
        }
    }

    /// Listen for events whose name matches `pattern` (see
    /// [`pattern_matches`]).
    ///
    /// Dropping the returned handle keeps the listener registered; call
    /// [`Subscription::unsubscribe`] to remove it.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&PanelEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let pattern = pattern.into();
        debug!(listener_id = id, pattern = %pattern, "Listener subscribed");
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                pattern,
                listener: Arc::new(listener),
            });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Listen for every event.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PanelEvent) + Send + Sync + 'static,
    {
        self.subscribe("*", listener)
    }

    /// Deliver an event to every matching listener, then to async receivers.
    ///
    /// Returns the number of listeners invoked. A panicking listener is
    /// logged and skipped; the remaining listeners still run.
    pub fn emit(&self, event: PanelEvent) -> usize {
        let event_type = event.event_type();
        let Some(_guard) = DepthGuard::enter(self.inner.max_depth) else {
            warn!(
                event_type,
                max_depth = self.inner.max_depth,
                "Nested emission too deep, event dropped"
            );
            return 0;
        };

        let snapshot: Vec<(u64, Listener)> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pattern_matches(&e.pattern, event_type))
            .map(|e| (e.id, Arc::clone(&e.listener)))
            .collect();

        for (id, listener) in &snapshot {
            trace!(listener_id = id, event_type, "Delivering event");
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if let Err(e) = result {
                warn!(listener_id = id, event_type, error = ?e, "Listener panicked");
            }
        }

        if self.inner.sender.send(Arc::new(event)).is_err() {
            trace!(event_type, "No async receivers for event");
        }
        snapshot.len()
    }

    /// An async receiver for every event emitted from now on.
    #[must_use]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver::new(self.inner.sender.subscribe(), None)
    }

    /// An async receiver for events whose name matches `pattern`.
    #[must_use]
    pub fn receiver_for(&self, pattern: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.inner.sender.subscribe(), Some(pattern.into()))
    }

    /// Remove every listener. Async receivers are unaffected.
    pub fn clear(&self) {
        let removed = {
            let mut listeners = self
                .inner
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *listeners)
        };
        debug!(count = removed.len(), "All listeners cleared");
        // Listeners drop here, outside the lock, so their destructors may
        // use the bus.
        drop(removed);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Receiver channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Maximum nesting of emissions per thread.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.inner.max_depth
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("capacity", &self.inner.capacity)
            .field("max_depth", &self.inner.max_depth)
            .finish()
    }
}

/// Handle for a registered listener.
///
/// Holds only a weak reference to the bus, so a listener that captures its
/// own handle does not keep the bus alive.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let removed = {
            let mut listeners = inner
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .position(|e| e.id == self.id)
                .map(|i| listeners.remove(i))
        };
        if removed.is_some() {
            debug!(listener_id = self.id, "Listener unsubscribed");
        }
        removed.is_some()
    }
}

/// Async receiver for events from the bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<PanelEvent>>,
    pattern: Option<String>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<Arc<PanelEvent>>, pattern: Option<String>) -> Self {
        Self { receiver, pattern }
    }

    fn matches(&self, event: &PanelEvent) -> bool {
        self.pattern
            .as_deref()
            .is_none_or(|p| pattern_matches(p, event.event_type()))
    }

    /// Receive the next matching event.
    ///
    /// Returns `None` once the bus and all its clones are dropped. Events
    /// missed because the receiver lagged are logged and skipped.
    pub async fn recv(&mut self) -> Option<Arc<PanelEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<PanelEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn cleared(entries: usize) -> PanelEvent {
        PanelEvent::CacheCleared {
            metadata: EventMetadata::new("test"),
            entries,
        }
    }

    fn changed() -> PanelEvent {
        PanelEvent::StateChanged {
            metadata: EventMetadata::new("test"),
            key: "memory:a".into(),
            revision: 1,
        }
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "template:built"));
        assert!(pattern_matches("template:*", "template:built"));
        assert!(!pattern_matches("template:*", "file:added"));
        assert!(pattern_matches("file:added", "file:added"));
        assert!(!pattern_matches("file:added", "file:added2"));
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let patterns = [
            ("cache:cleared", "a"),
            ("*", "b"),
            ("state:*", "c"),
            ("cache:*", "d"),
        ];
        for (pattern, tag) in patterns {
            let log = Arc::clone(&log);
            let _ = bus.subscribe(pattern, move |_| log.lock().unwrap().push(tag));
        }

        assert_eq!(bus.emit(cleared(0)), 3);
        assert_eq!(*log.lock().unwrap(), ["a", "b", "d"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(cleared(0));
        assert!(sub.unsubscribe());
        bus.emit(cleared(0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_set_is_snapshotted() {
        let bus = EventBus::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        let late = Arc::clone(&late_calls);
        let _ = bus.subscribe("cache:cleared", move |_| {
            let late = Arc::clone(&late);
            let _ = bus_clone.subscribe("cache:cleared", move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The listener added during the first emission is not called by it.
        bus.emit(cleared(0));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 2);

        bus.emit(cleared(0));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_delivery() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&slot);
        let c = Arc::clone(&calls);
        let sub = bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().unwrap().take() {
                // Must not deadlock against the emitting read.
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(cleared(0));
        bus.emit(cleared(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = bus.subscribe_all(|_| panic!("listener failure"));
        let c = Arc::clone(&count);
        let _ = bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(cleared(0)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_emission_is_immediate() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let l = Arc::clone(&log);
        let _ = bus.subscribe("cache:cleared", move |_| {
            l.lock().unwrap().push("outer-first");
            inner_bus.emit(changed());
        });
        let l = Arc::clone(&log);
        let _ = bus.subscribe("state:changed", move |_| {
            l.lock().unwrap().push("nested");
        });
        let l = Arc::clone(&log);
        let _ = bus.subscribe("cache:cleared", move |_| {
            l.lock().unwrap().push("outer-second");
        });

        bus.emit(cleared(0));
        assert_eq!(*log.lock().unwrap(), ["outer-first", "nested", "outer-second"]);
    }

    #[test]
    fn test_recursion_depth_is_bounded() {
        let bus = EventBus::with_limits(16, 4);
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let c = Arc::clone(&calls);
        let _ = bus.subscribe("cache:cleared", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            // Unbounded self-emission; the bus must cut it off.
            inner_bus.emit(cleared(0));
        });

        bus.emit(cleared(0));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // The counter unwinds fully, so a fresh emission runs again.
        calls.store(0, Ordering::SeqCst);
        bus.emit(cleared(0));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_clear_removes_listeners() {
        let bus = EventBus::new();
        let _ = bus.subscribe_all(|_| {});
        let _ = bus.subscribe("file:*", |_| {});
        assert_eq!(bus.listener_count(), 2);
        bus.clear();
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.emit(cleared(0)), 0);
    }

    #[tokio::test]
    async fn test_async_receivers() {
        let bus = EventBus::new();
        let mut all = bus.receiver();
        let mut state_only = bus.receiver_for("state:*");

        bus.emit(cleared(2));
        bus.emit(changed());

        assert_eq!(all.recv().await.unwrap().event_type(), "cache:cleared");
        assert_eq!(all.recv().await.unwrap().event_type(), "state:changed");
        assert_eq!(state_only.recv().await.unwrap().event_type(), "state:changed");
        assert!(state_only.try_recv().is_none());
    }
}
