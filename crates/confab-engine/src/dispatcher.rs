//! Routes the store's change feed to per-view subscriptions.
//!
//! One pump task per session drains the feed and walks the attached
//! subscriptions in order, so every view sees events in commit order.
//! Views never subscribe to the store directly; they attach a kind, a
//! filter and a handler here and get exactly the rows they asked for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use confab_store::Filter;
use confab_types::{ChangeEvent, RecordKind};

/// Identifies one attached subscription. Detaching through a stale handle,
/// or twice, is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Handler = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscriber {
    kind: RecordKind,
    filter: Filter,
    handler: Handler,
}

struct DispatcherInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().expect("pump lock poisoned").take() {
            pump.abort();
        }
    }
}

/// Clone-to-share handle over one running dispatcher. The pump stops when
/// the feed closes, on [`Dispatcher::shutdown`], or when the last handle
/// drops.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Start routing `changes`.
    pub fn spawn(changes: broadcast::Receiver<ChangeEvent>) -> Self {
        let inner = Arc::new(DispatcherInner {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pump: Mutex::new(None),
        });

        // The pump holds a weak reference so it never keeps a dispatcher
        // alive on its own.
        let pump = tokio::spawn(pump_loop(Arc::downgrade(&inner), changes));
        *inner.pump.lock().expect("pump lock poisoned") = Some(pump);

        Self { inner }
    }

    /// Attach a handler for changes of `kind` matching `filter`. Handlers
    /// run on the pump task and must not block; the engine's own handlers
    /// only push into channels.
    pub fn attach<F>(&self, kind: RecordKind, filter: Filter, handler: F) -> SubscriptionHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .expect("subscriber lock poisoned")
            .insert(
                id,
                Subscriber {
                    kind,
                    filter,
                    handler: Box::new(handler),
                },
            );
        debug!(id, ?kind, "subscription attached");
        SubscriptionHandle(id)
    }

    /// Detach a subscription. Idempotent. Once this returns the handler
    /// does not run again; an event already being routed may still reach
    /// it first.
    pub fn detach(&self, handle: SubscriptionHandle) {
        let removed = self
            .inner
            .subscribers
            .write()
            .expect("subscriber lock poisoned")
            .remove(&handle.0)
            .is_some();
        if removed {
            debug!(id = handle.0, "subscription detached");
        }
    }

    /// Drop every subscription and stop the pump.
    pub fn shutdown(&self) {
        self.inner
            .subscribers
            .write()
            .expect("subscriber lock poisoned")
            .clear();
        if let Some(pump) = self.inner.pump.lock().expect("pump lock poisoned").take() {
            pump.abort();
        }
        debug!("dispatcher shut down");
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .expect("subscriber lock poisoned")
            .len()
    }
}

async fn pump_loop(inner: Weak<DispatcherInner>, mut changes: broadcast::Receiver<ChangeEvent>) {
    loop {
        let event = match changes.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "change feed lagged, resuming with newer events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("change feed closed, pump stopping");
                break;
            }
        };

        let Some(inner) = inner.upgrade() else { break };
        let subscribers = inner.subscribers.read().expect("subscriber lock poisoned");
        for (id, subscriber) in subscribers.iter() {
            if subscriber.kind == event.kind() && subscriber.filter.matches(&event.record) {
                trace!(id, kind = ?subscriber.kind, "routing change event");
                (subscriber.handler)(&event);
            }
        }
    }
}
