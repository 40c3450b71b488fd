//! # Stateful Errors
//!
//! A stateful error is a fault *condition*, not a one-shot event: it has
//! an identity, a begin date and a lifecycle. Application code creates
//! one when it detects an ongoing fault (a sensor stopped answering, a
//! backend is unreachable) and calls [`StatefulError::resolve`] once the
//! condition clears. The logger wiring turns the handle into a recurring
//! report stream: one `occurrence`, a `retransmission` every
//! [`RETRANSMIT_INTERVAL`] while unresolved, exactly one `resolved`.
//!
//! If the owning component is torn down before resolution, the report
//! loop is cancelled without a `resolved` report: the condition's true
//! final state is unknown.

use mesh_types::time;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Interval between retransmission reports for an unresolved error.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A long-lived fault handle with an occurrence/resolution lifecycle.
pub struct StatefulError {
    message: String,
    error_id: Uuid,
    date: u64,
    resolved: watch::Sender<bool>,
}

impl StatefulError {
    /// Record a new ongoing fault.
    ///
    /// Generates a random 128-bit `error_id` and stamps the begin date.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let (resolved, _) = watch::channel(false);
        Self {
            message: message.into(),
            error_id: Uuid::new_v4(),
            date: time::now_ms(),
            resolved,
        }
    }

    /// Human-readable description of the condition.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Random 128-bit identity of this fault condition.
    #[must_use]
    pub fn error_id(&self) -> Uuid {
        self.error_id
    }

    /// Milliseconds since the Unix epoch when the fault was recorded.
    #[must_use]
    pub fn date(&self) -> u64 {
        self.date
    }

    /// Mark the condition as cleared. Terminal and idempotent: only the
    /// first call transitions the state.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn resolve(&self) -> bool {
        self.resolved.send_if_modified(|state| {
            if *state {
                false
            } else {
                *state = true;
                true
            }
        })
    }

    /// Whether the condition has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        *self.resolved.borrow()
    }

    /// Wait until the condition is resolved.
    ///
    /// Completes immediately if it already is.
    pub async fn resolved(&self) {
        let mut rx = self.resolved.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for StatefulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulError")
            .field("message", &self.message)
            .field("error_id", &self.error_id)
            .field("date", &self.date)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl fmt::Display for StatefulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StatefulError {}
