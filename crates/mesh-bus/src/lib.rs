//! # Mesh Bus - Raw Transport Boundary
//!
//! The overlay core never talks to a concrete transport. It talks to the
//! [`Bus`] trait defined here, which captures exactly what the underlying
//! distributed bus provides and nothing more:
//!
//! - attach/detach a listener on an exact-match address
//! - publish a timestamped value and learn how many listeners confirmed it
//! - observe listener-count changes for an address
//! - the sender identity delivered alongside every event
//!
//! Peer discovery, mutual-TLS membership and the wire format live behind a
//! real transport implementation elsewhere. [`LoopbackBus`] is the
//! in-process implementation used by tests and single-node runs.
//!
//! ## Spy listeners
//!
//! A listener attached with [`ListenerOpts::spy`] receives every event but
//! is excluded from listener counts: publishers cannot tell it is there.
//! This is how diagnostic taps observe a pipe without suppressing the
//! no-listener warning for its real consumers.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod loopback;

pub use loopback::LoopbackBus;

use async_trait::async_trait;
use mesh_types::NodeIdentity;
use serde_json::Value;
use std::sync::Arc;

/// An event delivered to a bus listener.
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Origin-node timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,

    /// The published value.
    pub value: Value,

    /// Transport-verified identity of the sender.
    pub source: NodeIdentity,
}

/// A listener callback. Invoked once per delivered event.
pub type BusHandler = Arc<dyn Fn(BusEvent) + Send + Sync>;

/// A listener-count observer. Invoked with the new count on every change.
pub type CountObserver = Arc<dyn Fn(usize) + Send + Sync>;

/// Options applied when attaching a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOpts {
    /// Receive events without being counted as a listener.
    pub spy: bool,
}

/// Handle identifying an attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle identifying a registered listener-count observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// The raw distributed bus, as seen by the overlay.
///
/// Addresses are matched by exact string comparison. Delivery between two
/// given nodes on one address preserves publish order; everything beyond
/// that (fan-out strategy, partitions, retries) is the transport's
/// business.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Identity of the local node.
    fn identity(&self) -> &NodeIdentity;

    /// Attach a listener to an address.
    fn on(&self, address: &str, handler: BusHandler, opts: ListenerOpts) -> ListenerId;

    /// Detach a previously attached listener. Unknown ids are ignored.
    fn remove_listener(&self, address: &str, id: ListenerId);

    /// Publish a value on an address.
    ///
    /// Resolves once delivery is confirmed and returns the number of
    /// counted (non-spy) listeners that received it.
    async fn emit(&self, address: &str, timestamp: u64, value: Value) -> usize;

    /// Observe listener-count changes for an address.
    ///
    /// If the address already has counted listeners, the observer fires
    /// immediately with the current count.
    fn observe_listener_count(&self, address: &str, observer: CountObserver) -> ObserverId;

    /// Remove a listener-count observer. Unknown ids are ignored.
    fn remove_observer(&self, address: &str, id: ObserverId);
}
