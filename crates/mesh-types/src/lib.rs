//! # Mesh Types - Shared Data Model
//!
//! Types shared by every crate of the flowmesh overlay:
//!
//! - **Identity**: the `(id, name)` pair stamped onto every envelope
//! - **Addresses**: the control-channel namespace under the `$mesh.` prefix
//! - **Envelope**: the wire-level wrapper around IPC payloads
//! - **Log records**: distributed log payloads and their stable message ids
//! - **Time**: millisecond wall-clock helpers
//!
//! Nothing in this crate touches the transport or the runtime; it is pure
//! data so that the bus boundary and the overlay core can agree on shapes
//! without depending on each other.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod address;
pub mod envelope;
pub mod identity;
pub mod log;
pub mod time;

// Re-export main types
pub use envelope::Envelope;
pub use identity::NodeIdentity;
pub use log::{LogLevel, LogRecord};
