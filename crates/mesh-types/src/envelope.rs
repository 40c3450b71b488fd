//! # IPC Envelope
//!
//! The wire-level wrapper for all control traffic. On the wire an envelope
//! is a flat JSON object: the payload's own fields plus `msgType`, `seq`,
//! `nodeId`, `nodeName` and `date`.
//!
//! `seq` is assigned by the sender's IPC instance and increases
//! monotonically per sender process, not per address. `nodeId`/`nodeName`
//! are stamped by the *receiver* from the transport-provided sender
//! identity; whatever the sender wrote there is overwritten and never
//! trusted.
//!
//! Objects missing `msgType` or `seq` are not envelopes and are discarded
//! unprocessed.

use crate::identity::NodeIdentity;
use serde_json::{Map, Value};

/// The universal wrapper around IPC payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Message type the receiver dispatches on.
    pub msg_type: String,

    /// Per-sender-process monotonic sequence number.
    pub seq: u64,

    /// Sender node id, stamped from the transport identity on receipt.
    pub node_id: String,

    /// Sender node name, stamped from the transport identity on receipt.
    pub node_name: String,

    /// Milliseconds since the Unix epoch at the moment of sending.
    pub date: u64,

    /// Application payload fields.
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Parse an envelope from its wire representation.
    ///
    /// Returns `None` if the value is not an object or lacks a string
    /// `msgType` or an integer `seq`. Such values are transport noise and
    /// must be dropped without further processing.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let msg_type = obj.get("msgType")?.as_str()?.to_owned();
        let seq = obj.get("seq")?.as_u64()?;

        let node_id = obj
            .get("nodeId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let node_name = obj
            .get("nodeName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let date = obj.get("date").and_then(Value::as_u64).unwrap_or_default();

        let mut payload = obj.clone();
        for key in ["msgType", "seq", "nodeId", "nodeName", "date"] {
            payload.remove(key);
        }

        Some(Self {
            msg_type,
            seq,
            node_id,
            node_name,
            date,
            payload,
        })
    }

    /// Render the envelope into its flat wire representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert("msgType".into(), Value::from(self.msg_type.clone()));
        obj.insert("seq".into(), Value::from(self.seq));
        obj.insert("nodeId".into(), Value::from(self.node_id.clone()));
        obj.insert("nodeName".into(), Value::from(self.node_name.clone()));
        obj.insert("date".into(), Value::from(self.date));
        Value::Object(obj)
    }

    /// Overwrite the sender identity fields from the transport identity.
    pub fn stamp_sender(&mut self, sender: &NodeIdentity) {
        self.node_id = sender.id.clone();
        self.node_name = sender.name.clone();
    }

    /// Fetch a string payload field.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
