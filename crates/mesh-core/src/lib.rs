//! # Mesh Core - Reliability & Dataflow Overlay
//!
//! The overlay that turns a raw distributed bus into something
//! applications can rely on:
//!
//! - **Dedup**: per-sender sliding-window suppression of duplicated and
//!   stale envelopes
//! - **IPC**: the envelope protocol: identity stamping, sequence
//!   numbering, reference-counted subscriptions, listener-count
//!   observation
//! - **Input / Output**: dataflow endpoints bound to pipes, with
//!   drift-compensated expiry, checkpoints, throttling and retransmission
//! - **StatefulError**: long-lived fault handles with an
//!   occurrence/retransmission/resolution lifecycle
//! - **Logger**: per-component distributed log records with stable
//!   message ids
//! - **Advertiser**: listener-gated introspection of live components
//! - **Component host**: lifecycle of application logic wired between
//!   endpoints
//!
//! Everything here talks to the transport exclusively through the
//! [`mesh_bus::Bus`] trait.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod advert;
pub mod component;
pub mod dedup;
pub mod input;
pub mod ipc;
pub mod logger;
pub mod output;
pub mod stateful_error;

// Re-export main types
pub use advert::Advertiser;
pub use component::{
    Component, ComponentConfig, ComponentError, ComponentInfo, Host, HostHandle, PortInfo, Ports,
    Teardown, TeardownFuture,
};
pub use dedup::{Dedup, DedupConfig};
pub use input::{Checkpoint, Input, InputConfig, InputEvent, Sample, SampleSource};
pub use ipc::{Ipc, IpcError, IpcSubscription, MessageFilter, ObserverHandle};
pub use logger::{Logger, ReportHandle};
pub use output::{Output, OutputConfig};
pub use stateful_error::{StatefulError, RETRANSMIT_INTERVAL};
