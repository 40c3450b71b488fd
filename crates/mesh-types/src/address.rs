//! # Control-Channel Address Namespace
//!
//! Pipes are raw transport addresses chosen by the user. Everything the
//! overlay itself sends travels under a fixed prefix so that control
//! traffic can never collide with a pipe:
//!
//! | Address | Purpose |
//! |---------|---------|
//! | `broadcast` | reaches every node |
//! | `unicast.<nodeId>` | reaches one node |
//! | `multicast.log.<nodeId>.<level>` | log records emitted by one node |
//! | `multicast.adv` | component advertisements |
//!
//! Address equality is exact string match at the transport level; no
//! wildcard expansion happens in this layer.

use crate::log::LogLevel;

/// Prefix for every overlay-level address on the raw bus.
pub const ADDRESS_PREFIX: &str = "$mesh.";

/// Broadcast control address (reaches every node).
pub const BROADCAST: &str = "broadcast";

/// Multicast address for component advertisements.
pub const ADV_MULTICAST: &str = "multicast.adv";

/// Prepend the overlay prefix to a control address.
#[must_use]
pub fn prefixed(address: &str) -> String {
    format!("{ADDRESS_PREFIX}{address}")
}

/// Unicast control address of a node.
#[must_use]
pub fn unicast(node_id: &str) -> String {
    format!("unicast.{node_id}")
}

/// Log multicast address of a node at a level.
#[must_use]
pub fn log_multicast(node_id: &str, level: LogLevel) -> String {
    format!("multicast.log.{node_id}.{level}")
}
