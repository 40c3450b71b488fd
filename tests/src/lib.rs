//! # Flowmesh Test Suite
//!
//! Unified test crate for scenarios that span more than one crate:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── dataflow.rs       # Output → pipe → Input scenarios
//!     └── control_plane.rs  # IPC, logging and advertisement across nodes
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mesh-tests
//!
//! # By category
//! cargo test -p mesh-tests integration::dataflow::
//! cargo test -p mesh-tests integration::control_plane::
//! ```
//!
//! Set `RUST_LOG` to see overlay tracing while a test runs.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod integration;

/// Route overlay tracing to the test writer. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
