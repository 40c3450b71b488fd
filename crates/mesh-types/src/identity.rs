//! # Node Identity
//!
//! Every process on the mesh is identified by an opaque id assigned by the
//! transport membership layer and a human-readable name taken from its
//! certificate subject. The pair is stamped onto every envelope on the
//! receive path; payloads never carry their own identity fields.

use serde::{Deserialize, Serialize};

/// Identity of a node on the mesh.
///
/// The `id` is the sole source of truth for deduplication state; the
/// `name` exists for humans reading logs and advertisements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Opaque transport-assigned node id.
    pub id: String,

    /// Human-readable node name (certificate common name).
    pub name: String,
}

impl NodeIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality() {
        let a = NodeIdentity::new("abc", "node-a");
        let b = NodeIdentity::new("abc", "node-a");
        let c = NodeIdentity::new("def", "node-a");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
