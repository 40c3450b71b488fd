//! Cross-crate integration scenarios.

pub mod control_plane;
pub mod dataflow;
