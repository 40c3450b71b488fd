//! # Distributed Log Records
//!
//! Log records travel over IPC on `multicast.log.<nodeId>.<level>` with
//! `msgType = "log"`. Every record carried by the overlay core includes a
//! stable, hard-coded message id (a fixed hex token) identifying the
//! failure class, so downstream consumers can deduplicate and alert on a
//! class of failure independent of the human-readable text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message id: an inbound value was rejected by an input checkpoint.
pub const MSGID_CHECKPOINT_REJECTED: &str = "9a4d1c6f0e8b42d3a57c1f2e6b9d803a";

/// Message id: an input value passed its expire duration without renewal.
pub const MSGID_VALUE_EXPIRED: &str = "4f82e6a1d0c94b7e8a3d5c2f719e4b06";

/// Message id: an output publish was confirmed by zero listeners.
pub const MSGID_NO_LISTENERS: &str = "b31c7d9e2f5a48c6900d4e8a1b6f3c72";

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Application-visible failure.
    Error,
    /// Degraded but operating.
    Warn,
    /// Informational.
    Info,
}

impl LogLevel {
    /// The lowercase wire name of the level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log record as carried in the payload of a `log` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,

    /// Id of the component instance that emitted the record.
    pub component_id: String,

    /// Name of the component instance that emitted the record.
    pub component_name: String,

    /// Human-readable text.
    pub message: String,

    /// Stable id of the failure class, if the record belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl LogRecord {
    /// Render the record into an envelope payload map.
    #[must_use]
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Parse a record back out of an envelope payload map.
    #[must_use]
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(payload.clone())).ok()
    }
}
