//! # Loopback Bus
//!
//! In-process implementation of [`Bus`] for tests and single-node runs.
//! Several logical "nodes" can share one loopback mesh via
//! [`LoopbackBus::join`]; each endpoint carries its own identity, so a
//! subscriber on endpoint B sees events published on endpoint A with A's
//! identity attached, exactly as a real transport would report it.
//!
//! Delivery is synchronous within `emit`, which preserves the per-sender,
//! per-address ordering the overlay relies on.

use crate::{Bus, BusEvent, BusHandler, CountObserver, ListenerId, ListenerOpts, ObserverId};
use async_trait::async_trait;
use mesh_types::NodeIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

struct ListenerEntry {
    id: ListenerId,
    handler: BusHandler,
    spy: bool,
}

#[derive(Default)]
struct Inner {
    listeners: HashMap<String, Vec<ListenerEntry>>,
    observers: HashMap<String, Vec<(ObserverId, CountObserver)>>,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

/// An endpoint on an in-process loopback mesh.
pub struct LoopbackBus {
    identity: NodeIdentity,
    shared: Arc<Shared>,
}

impl LoopbackBus {
    /// Create a new loopback mesh with a single endpoint.
    #[must_use]
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Join the same mesh as another logical node.
    ///
    /// The returned endpoint shares listeners and counts with `self` but
    /// publishes under its own identity.
    #[must_use]
    pub fn join(&self, identity: NodeIdentity) -> Self {
        Self {
            identity,
            shared: Arc::clone(&self.shared),
        }
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn counted_listeners(inner: &Inner, address: &str) -> usize {
        inner
            .listeners
            .get(address)
            .map(|entries| entries.iter().filter(|e| !e.spy).count())
            .unwrap_or(0)
    }

    /// Notify the address's observers outside the lock.
    fn notify_observers(&self, address: &str) {
        let (count, observers): (usize, Vec<CountObserver>) = {
            let inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            let count = Self::counted_listeners(&inner, address);
            let observers = inner
                .observers
                .get(address)
                .map(|o| o.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            (count, observers)
        };
        for observer in observers {
            observer(count);
        }
    }
}

#[async_trait]
impl Bus for LoopbackBus {
    fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    fn on(&self, address: &str, handler: BusHandler, opts: ListenerOpts) -> ListenerId {
        let id = ListenerId(self.next_id());
        {
            let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .listeners
                .entry(address.to_owned())
                .or_default()
                .push(ListenerEntry {
                    id,
                    handler,
                    spy: opts.spy,
                });
        }
        trace!(address, spy = opts.spy, "listener attached");
        if !opts.spy {
            self.notify_observers(address);
        }
        id
    }

    fn remove_listener(&self, address: &str, id: ListenerId) {
        let removed_counted = {
            let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entries) = inner.listeners.get_mut(address) else {
                return;
            };
            let before = entries.len();
            let mut removed_counted = false;
            entries.retain(|e| {
                if e.id == id && !e.spy {
                    removed_counted = true;
                }
                e.id != id
            });
            let removed_any = entries.len() != before;
            if entries.is_empty() {
                inner.listeners.remove(address);
            }
            if !removed_any {
                return;
            }
            removed_counted
        };
        trace!(address, "listener detached");
        if removed_counted {
            self.notify_observers(address);
        }
    }

    async fn emit(&self, address: &str, timestamp: u64, value: Value) -> usize {
        let (handlers, count): (Vec<BusHandler>, usize) = {
            let inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            let handlers = inner
                .listeners
                .get(address)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
                .unwrap_or_default();
            (handlers, Self::counted_listeners(&inner, address))
        };
        let event = BusEvent {
            timestamp,
            value,
            source: self.identity.clone(),
        };
        for handler in handlers {
            handler(event.clone());
        }
        count
    }

    fn observe_listener_count(&self, address: &str, observer: CountObserver) -> ObserverId {
        let id = ObserverId(self.next_id());
        let current = {
            let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            let current = Self::counted_listeners(&inner, address);
            inner
                .observers
                .entry(address.to_owned())
                .or_default()
                .push((id, Arc::clone(&observer)));
            current
        };
        if current > 0 {
            observer(current);
        }
        id
    }

    fn remove_observer(&self, address: &str, id: ObserverId) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(observers) = inner.observers.get_mut(address) {
            observers.retain(|(oid, _)| *oid != id);
            if observers.is_empty() {
                inner.observers.remove(address);
            }
        }
    }
}
