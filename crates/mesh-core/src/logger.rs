//! # Component Logger
//!
//! Every component instance gets a [`Logger`] bound to its id and name.
//! Records are published fire-and-forget over IPC on
//! `multicast.log.<nodeId>.<level>` with `msgType = "log"`, and mirrored
//! to the local `tracing` subscriber so single-node runs stay observable
//! without any log consumer on the mesh.
//!
//! Stable message ids (see [`mesh_types::log`]) ride along with every
//! record the overlay core emits, so downstream consumers can group and
//! deduplicate by failure class.
//!
//! [`Logger::report`] wires a [`StatefulError`] into the log stream:
//! occurrence now, retransmission every interval, one resolved report on
//! resolution. Dropping the returned handle cancels the loop silently.

use crate::ipc::Ipc;
use crate::stateful_error::{StatefulError, RETRANSMIT_INTERVAL};
use mesh_types::{address, LogLevel, LogRecord};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

struct LoggerInner {
    ipc: Arc<Ipc>,
    component_id: String,
    component_name: String,
}

/// Log handle of one component instance. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    /// Create a logger bound to a component instance.
    #[must_use]
    pub fn new(
        ipc: Arc<Ipc>,
        component_id: impl Into<String>,
        component_name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                ipc,
                component_id: component_id.into(),
                component_name: component_name.into(),
            }),
        }
    }

    /// Log at error level.
    pub fn error(&self, message: impl Into<String>, message_id: Option<&str>) {
        self.log(LogLevel::Error, message.into(), message_id);
    }

    /// Log at warn level.
    pub fn warn(&self, message: impl Into<String>, message_id: Option<&str>) {
        self.log(LogLevel::Warn, message.into(), message_id);
    }

    /// Log at info level.
    pub fn info(&self, message: impl Into<String>, message_id: Option<&str>) {
        self.log(LogLevel::Info, message.into(), message_id);
    }

    /// Log at a dynamically chosen level.
    ///
    /// Endpoints use this for their configurable log levels; a `None`
    /// level in the endpoint config suppresses the call site entirely,
    /// so this method always logs.
    pub fn log(&self, level: LogLevel, message: String, message_id: Option<&str>) {
        let record = LogRecord {
            level,
            component_id: self.inner.component_id.clone(),
            component_name: self.inner.component_name.clone(),
            message,
            message_id: message_id.map(str::to_owned),
        };
        self.mirror(&record);
        self.publish(level, record.to_payload());
    }

    /// Report a stateful error until it resolves.
    ///
    /// Sends an `occurrence` record immediately, a `retransmission`
    /// record every [`RETRANSMIT_INTERVAL`] while unresolved, and exactly
    /// one `resolved` record on resolution. Dropping or aborting the
    /// returned handle stops the loop without a `resolved` record.
    #[must_use]
    pub fn report(&self, error: Arc<StatefulError>) -> ReportHandle {
        self.report_with_interval(error, RETRANSMIT_INTERVAL)
    }

    fn report_with_interval(&self, error: Arc<StatefulError>, interval: Duration) -> ReportHandle {
        let logger = self.clone();
        let handle = tokio::spawn(async move {
            logger.send_error_report(&error, "occurrence");
            loop {
                tokio::select! {
                    () = error.resolved() => {
                        logger.send_error_report(&error, "resolved");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        logger.send_error_report(&error, "retransmission");
                    }
                }
            }
        });
        ReportHandle {
            handle: Some(handle),
        }
    }

    fn send_error_report(&self, error: &StatefulError, state: &str) {
        let record = LogRecord {
            level: LogLevel::Error,
            component_id: self.inner.component_id.clone(),
            component_name: self.inner.component_name.clone(),
            message: error.message().to_owned(),
            message_id: None,
        };
        self.mirror(&record);
        let mut payload = record.to_payload();
        payload.insert(
            "errorId".into(),
            Value::from(error.error_id().simple().to_string()),
        );
        payload.insert("date".into(), Value::from(error.date()));
        payload.insert("state".into(), Value::from(state));
        self.publish(LogLevel::Error, payload);
    }

    /// Publish a record over IPC without blocking the caller.
    fn publish(&self, level: LogLevel, payload: Map<String, Value>) {
        let inner = Arc::clone(&self.inner);
        let addr = address::log_multicast(&inner.ipc.identity().id, level);
        tokio::spawn(async move {
            if let Err(err) = inner.ipc.send(&addr, "log", payload).await {
                warn!(%err, "failed to publish log record");
            }
        });
    }

    fn mirror(&self, record: &LogRecord) {
        let component = record.component_name.as_str();
        let message_id = record.message_id.as_deref().unwrap_or("");
        match record.level {
            LogLevel::Error => {
                tracing::error!(component, message_id, "{}", record.message);
            }
            LogLevel::Warn => {
                tracing::warn!(component, message_id, "{}", record.message);
            }
            LogLevel::Info => {
                tracing::info!(component, message_id, "{}", record.message);
            }
        }
    }
}

/// Handle of a running stateful-error report loop.
///
/// Aborting (or dropping) the handle cancels retransmission without
/// emitting a `resolved` record.
pub struct ReportHandle {
    handle: Option<JoinHandle<()>>,
}

impl ReportHandle {
    /// Stop reporting. The error's final state stays unreported.
    pub fn abort(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ReportHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
