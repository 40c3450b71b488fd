//! # IPC - Envelope Protocol Over the Raw Bus
//!
//! Wraps the raw bus with the overlay's control-plane semantics:
//!
//! - every control address is namespaced under [`mesh_types::address::ADDRESS_PREFIX`]
//! - outbound envelopes are stamped with a per-process monotonic `seq`,
//!   the send date and the local identity
//! - inbound envelopes are parsed, deduplicated per remote sender and
//!   re-emitted locally on a broadcast channel, stamped with the
//!   transport-verified sender identity
//! - subscriptions are reference counted: one transport listener per
//!   address no matter how many local consumers asked for it
//!
//! Malformed envelopes (no `msgType`, no `seq`) and duplicates are
//! dropped silently; they are transport noise, not application errors.

use crate::dedup::{Dedup, DedupConfig};
use mesh_bus::{Bus, BusEvent, ListenerId, ListenerOpts, ObserverId};
use mesh_types::{address, time, Envelope, NodeIdentity};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Local fan-out buffer per IPC instance.
const LOCAL_CHANNEL_CAPACITY: usize = 256;

/// Errors from IPC operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// `send` was called without an address.
    #[error("address is required")]
    AddressRequired,

    /// `send` was called without a message type.
    #[error("msgType is required")]
    MsgTypeRequired,
}

struct SubEntry {
    ref_count: u32,
    listener: ListenerId,
}

/// The envelope protocol endpoint of one process.
///
/// Owns the per-process sequence counter and the per-remote-sender
/// [`Dedup`] map. Constructed once per node and shared.
pub struct Ipc {
    bus: Arc<dyn Bus>,
    seq: AtomicU64,
    inbound: broadcast::Sender<Envelope>,
    subscriptions: Mutex<HashMap<String, SubEntry>>,
    dedup: Arc<Mutex<HashMap<String, Dedup>>>,
}

impl Ipc {
    /// Create an IPC endpoint and register the two implicit
    /// subscriptions: `broadcast` and `unicast.<nodeId>`.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>) -> Arc<Self> {
        let (inbound, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        let ipc = Arc::new(Self {
            bus,
            seq: AtomicU64::new(0),
            inbound,
            subscriptions: Mutex::new(HashMap::new()),
            dedup: Arc::new(Mutex::new(HashMap::new())),
        });
        ipc.subscribe(address::BROADCAST);
        let unicast = address::unicast(&ipc.bus.identity().id);
        ipc.subscribe(&unicast);
        ipc
    }

    /// Identity of the local node.
    #[must_use]
    pub fn identity(&self) -> &NodeIdentity {
        self.bus.identity()
    }

    /// Subscribe to a control address.
    ///
    /// The first subscription attaches the transport listener; repeated
    /// subscriptions only increment a reference count.
    pub fn subscribe(&self, addr: &str) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = subs.get_mut(addr) {
            entry.ref_count += 1;
            return;
        }

        let dedup = Arc::clone(&self.dedup);
        let inbound = self.inbound.clone();
        let handler = Arc::new(move |event: BusEvent| {
            Self::handle_inbound(&dedup, &inbound, event);
        });
        let listener = self
            .bus
            .on(&address::prefixed(addr), handler, ListenerOpts::default());
        subs.insert(
            addr.to_owned(),
            SubEntry {
                ref_count: 1,
                listener,
            },
        );
        debug!(addr, "ipc subscription attached");
    }

    /// Drop one reference to a control address subscription.
    ///
    /// The transport listener is detached when the last reference goes.
    pub fn unsubscribe(&self, addr: &str) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(entry) = subs.get_mut(addr) else {
            return;
        };
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return;
        }
        if let Some(entry) = subs.remove(addr) {
            self.bus
                .remove_listener(&address::prefixed(addr), entry.listener);
            debug!(addr, "ipc subscription detached");
        }
    }

    /// Inbound path: parse, dedup per sender, stamp identity, re-emit.
    fn handle_inbound(
        dedup: &Mutex<HashMap<String, Dedup>>,
        inbound: &broadcast::Sender<Envelope>,
        event: BusEvent,
    ) {
        let Some(mut envelope) = Envelope::from_value(&event.value) else {
            trace!("dropping malformed envelope");
            return;
        };

        {
            let mut map = dedup.lock().unwrap_or_else(|e| e.into_inner());
            let window = map
                .entry(event.source.id.clone())
                .or_insert_with(|| Dedup::new(DedupConfig::default()));
            if !window.dedup(envelope.seq) {
                trace!(
                    seq = envelope.seq,
                    sender = %event.source.id,
                    "dropping duplicate or stale envelope"
                );
                return;
            }
        }

        envelope.stamp_sender(&event.source);
        // Err only means no local consumer right now
        let _ = inbound.send(envelope);
    }

    /// Subscribe to locally re-emitted envelopes matching a filter.
    #[must_use]
    pub fn messages(&self, filter: MessageFilter) -> IpcSubscription {
        IpcSubscription {
            receiver: self.inbound.subscribe(),
            filter,
        }
    }

    /// Send an envelope.
    ///
    /// Stamps `seq`, `date` and the local identity, publishes on the
    /// prefixed address and returns the transport's delivery count.
    ///
    /// # Errors
    ///
    /// [`IpcError::AddressRequired`] / [`IpcError::MsgTypeRequired`] if
    /// either argument is empty.
    pub async fn send(
        &self,
        addr: &str,
        msg_type: &str,
        payload: Map<String, Value>,
    ) -> Result<usize, IpcError> {
        if addr.is_empty() {
            return Err(IpcError::AddressRequired);
        }
        if msg_type.is_empty() {
            return Err(IpcError::MsgTypeRequired);
        }

        let identity = self.bus.identity();
        let envelope = Envelope {
            msg_type: msg_type.to_owned(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            node_id: identity.id.clone(),
            node_name: identity.name.clone(),
            date: time::now_ms(),
            payload,
        };
        let listeners = self
            .bus
            .emit(
                &address::prefixed(addr),
                envelope.date,
                envelope.to_value(),
            )
            .await;
        Ok(listeners)
    }

    /// Observe listener-count changes for a control address.
    ///
    /// The callback receives `(new_count, old_count)` on every change.
    /// Used to gate expensive broadcasts on somebody actually listening.
    #[must_use]
    pub fn observe(
        &self,
        addr: &str,
        on_change: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> ObserverHandle {
        let prefixed = address::prefixed(addr);
        let last = Mutex::new(0usize);
        let id = self.bus.observe_listener_count(
            &prefixed,
            Arc::new(move |count| {
                let old = {
                    let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                    std::mem::replace(&mut *last, count)
                };
                on_change(count, old);
            }),
        );
        ObserverHandle {
            bus: Arc::clone(&self.bus),
            address: prefixed,
            id: Some(id),
        }
    }
}

/// Filter for local envelope consumers.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Message types to include. Empty means all.
    pub msg_types: Vec<String>,
}

impl MessageFilter {
    /// Accept every envelope.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept a single message type.
    #[must_use]
    pub fn of(msg_type: impl Into<String>) -> Self {
        Self {
            msg_types: vec![msg_type.into()],
        }
    }

    /// Check an envelope against the filter.
    #[must_use]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.msg_types.is_empty() || self.msg_types.iter().any(|t| *t == envelope.msg_type)
    }
}

/// A handle for receiving locally re-emitted envelopes.
pub struct IpcSubscription {
    receiver: broadcast::Receiver<Envelope>,
    filter: MessageFilter,
}

impl IpcSubscription {
    /// Receive the next envelope that matches the filter.
    ///
    /// Returns `None` when the IPC instance is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let envelope = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "ipc consumer lagged, envelopes dropped");
                    continue;
                }
            };
            if self.filter.matches(&envelope) {
                return Some(envelope);
            }
        }
    }

    /// Try to receive without blocking. `Ok(None)` means nothing pending.
    pub fn try_recv(&mut self) -> Result<Option<Envelope>, broadcast::error::TryRecvError> {
        loop {
            let envelope = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            };
            if self.filter.matches(&envelope) {
                return Ok(Some(envelope));
            }
        }
    }
}

/// Cancellation handle for an [`Ipc::observe`] registration.
///
/// Dropping the handle stops the observation.
pub struct ObserverHandle {
    bus: Arc<dyn Bus>,
    address: String,
    id: Option<ObserverId>,
}

impl ObserverHandle {
    /// Stop observing.
    pub fn stop(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(id) = self.id.take() {
            self.bus.remove_observer(&self.address, id);
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.remove();
    }
}
