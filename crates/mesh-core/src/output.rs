//! # Output Endpoint
//!
//! The producer side of a pipe. An output stores the latest set value and
//! publishes it on its pipe, with two optional timing behaviours layered
//! on top:
//!
//! - **throttle**: a minimum spacing between republications of an
//!   *unchanged* value. A throttled call is a full no-op: nothing is
//!   stored, nothing is published, no timer is reset. A changed value or
//!   an elapsed window always goes through.
//! - **retransmit**: an unconditional heartbeat of the last set value at a
//!   fixed interval, restarting from zero on every explicit set.
//!
//! Every publish awaits the transport's delivery confirmation. A confirmed
//! listener count of zero is a liveness warning, not a failure: the value
//! went nowhere, but the publish itself succeeded.

use crate::logger::Logger;
use mesh_bus::Bus;
use mesh_types::log::MSGID_NO_LISTENERS;
use mesh_types::{time, LogLevel};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Configuration of an output endpoint.
#[derive(Clone)]
pub struct OutputConfig {
    /// Name for addressing the endpoint inside its component.
    pub name: Option<String>,

    /// Pipe to publish on. Absent means the endpoint only stores values.
    pub pipe: Option<String>,

    /// Initial value, published immediately if a pipe is set.
    pub value: Option<Value>,

    /// Minimum spacing between republications of an unchanged value.
    pub throttle: Option<Duration>,

    /// Interval at which the last value is unconditionally republished.
    pub retransmit: Option<Duration>,

    /// Level for zero-listener warnings. `None` suppresses them.
    pub log_level_no_listeners: Option<LogLevel>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: None,
            pipe: None,
            value: None,
            throttle: None,
            retransmit: None,
            log_level_no_listeners: Some(LogLevel::Warn),
        }
    }
}

impl OutputConfig {
    /// Configuration bound to a pipe, everything else default.
    #[must_use]
    pub fn bound(pipe: impl Into<String>) -> Self {
        Self {
            pipe: Some(pipe.into()),
            ..Self::default()
        }
    }
}

struct OutputState {
    value: Option<Value>,
    timestamp: Option<u64>,
    /// Bumped on every explicit set; a retransmit loop from an older set
    /// compares against it and backs off.
    epoch: u64,
    retransmit_timer: Option<JoinHandle<()>>,
    destroyed: bool,
}

struct OutputShared {
    pipe: Option<String>,
    throttle: Option<Duration>,
    retransmit: Option<Duration>,
    log_level_no_listeners: Option<LogLevel>,
    logger: Option<Logger>,
    bus: Arc<dyn Bus>,
    state: Mutex<OutputState>,
}

impl OutputShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn apply(self: &Arc<Self>, value: Value, timestamp: u64) {
        {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            if let (Some(throttle), Some(current), Some(last)) =
                (self.throttle, state.value.as_ref(), state.timestamp)
            {
                let unchanged = *current == value;
                if unchanged && timestamp < last.saturating_add(throttle.as_millis() as u64) {
                    trace!(pipe = self.pipe.as_deref().unwrap_or(""), "set throttled");
                    return;
                }
            }
            state.value = Some(value.clone());
            state.timestamp = Some(timestamp);
            state.epoch += 1;
            if let Some(timer) = state.retransmit_timer.take() {
                timer.abort();
            }
            if let Some(interval) = self.retransmit {
                let shared = Arc::clone(self);
                let epoch = state.epoch;
                let value = value.clone();
                state.retransmit_timer = Some(tokio::spawn(async move {
                    shared.retransmit_loop(epoch, interval, value).await;
                }));
            }
        }
        self.publish(timestamp, value).await;
    }

    /// Heartbeat of the last explicitly set value. Bypasses throttling; a
    /// newer explicit set supersedes this loop via the epoch.
    async fn retransmit_loop(self: Arc<Self>, epoch: u64, interval: Duration, value: Value) {
        loop {
            tokio::time::sleep(interval).await;
            let timestamp = time::now_ms();
            {
                let mut state = self.lock();
                if state.destroyed || state.epoch != epoch {
                    return;
                }
                state.timestamp = Some(timestamp);
            }
            self.publish(timestamp, value.clone()).await;
        }
    }

    async fn publish(&self, timestamp: u64, value: Value) {
        let Some(pipe) = &self.pipe else {
            return;
        };
        let count = self.bus.emit(pipe, timestamp, value).await;
        if count == 0 {
            if let (Some(level), Some(logger)) = (self.log_level_no_listeners, &self.logger) {
                logger.log(
                    level,
                    format!("no listeners on pipe '{pipe}'"),
                    Some(MSGID_NO_LISTENERS),
                );
            }
        }
    }
}

/// Producer-side dataflow endpoint bound to a pipe.
///
/// Owned exclusively by its component; [`Output::destroy`] cancels the
/// retransmit heartbeat.
pub struct Output {
    name: Option<String>,
    shared: Arc<OutputShared>,
}

impl Output {
    /// Create an output endpoint.
    ///
    /// A configured initial value is set (and published, if a pipe is
    /// set) as soon as the runtime gets to it.
    #[must_use]
    pub fn new(config: OutputConfig, bus: Arc<dyn Bus>, logger: Option<Logger>) -> Self {
        let shared = Arc::new(OutputShared {
            pipe: config.pipe,
            throttle: config.throttle,
            retransmit: config.retransmit,
            log_level_no_listeners: config.log_level_no_listeners,
            logger,
            bus,
            state: Mutex::new(OutputState {
                value: None,
                timestamp: None,
                epoch: 0,
                retransmit_timer: None,
                destroyed: false,
            }),
        });

        if let Some(value) = config.value {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let now = time::now_ms();
                shared.apply(value, now).await;
            });
        }

        Self {
            name: config.name,
            shared,
        }
    }

    /// Name of the endpoint inside its component, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pipe the endpoint publishes on, if any.
    #[must_use]
    pub fn pipe(&self) -> Option<&str> {
        self.shared.pipe.as_deref()
    }

    /// Set the value, timestamped now, and publish it.
    pub async fn set(&self, value: Value) {
        self.set_at(value, time::now_ms()).await;
    }

    /// Set the value with an explicit origin timestamp and publish it.
    ///
    /// Subject to the throttle rule; resets the retransmit heartbeat on
    /// every accepted set.
    pub async fn set_at(&self, value: Value, timestamp: u64) {
        self.shared.apply(value, timestamp).await;
    }

    /// Latest set value.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.shared.lock().value.clone()
    }

    /// Timestamp of the latest accepted set.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.shared.lock().timestamp
    }

    /// Milliseconds since the latest accepted set.
    ///
    /// `None` if no value has ever been set.
    #[must_use]
    pub fn age(&self) -> Option<u64> {
        self.shared
            .lock()
            .timestamp
            .map(|ts| time::now_ms().saturating_sub(ts))
    }

    /// Cancel the retransmit heartbeat. Idempotent.
    pub fn destroy(&self) {
        let mut state = self.shared.lock();
        state.destroyed = true;
        if let Some(timer) = state.retransmit_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_bus::{BusEvent, ListenerOpts, LoopbackBus};
    use mesh_types::NodeIdentity;
    use serde_json::json;
    use tokio::time::advance;

    fn test_bus() -> Arc<LoopbackBus> {
        Arc::new(LoopbackBus::new(NodeIdentity::new("local", "local-name")))
    }

    /// Collects everything published on one address.
    fn tap(bus: &Arc<LoopbackBus>, address: &str) -> Arc<Mutex<Vec<(u64, Value)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(
            address,
            Arc::new(move |event: BusEvent| {
                sink.lock().unwrap().push((event.timestamp, event.value));
            }),
            ListenerOpts::default(),
        );
        seen
    }

    async fn drain() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_set_publishes_on_pipe() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let output = Output::new(OutputConfig::bound("p"), bus, None);

        output.set_at(json!(42), 7).await;

        assert_eq!(seen.lock().unwrap().as_slice(), &[(7, json!(42))]);
        assert_eq!(output.value(), Some(json!(42)));
        assert_eq!(output.timestamp(), Some(7));
    }

    #[tokio::test]
    async fn test_initial_value_is_published() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let config = OutputConfig {
            value: Some(json!("boot")),
            ..OutputConfig::bound("p")
        };
        let _output = Output::new(config, bus, None);
        drain().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, json!("boot"));
    }

    #[tokio::test]
    async fn test_unbound_output_only_stores() {
        let output = Output::new(OutputConfig::default(), test_bus(), None);
        output.set_at(json!(1), 5).await;
        assert_eq!(output.value(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_throttle_suppresses_unchanged_value() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let config = OutputConfig {
            throttle: Some(Duration::from_millis(1000)),
            ..OutputConfig::bound("p")
        };
        let output = Output::new(config, bus, None);

        output.set_at(json!(5), 0).await;
        output.set_at(json!(5), 999).await; // inside the window: no-op
        output.set_at(json!(5), 1000).await; // window elapsed: publishes

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(0, json!(5)), (1000, json!(5))]
        );
    }

    #[tokio::test]
    async fn test_changed_value_bypasses_throttle() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let config = OutputConfig {
            throttle: Some(Duration::from_millis(1000)),
            ..OutputConfig::bound("p")
        };
        let output = Output::new(config, bus, None);

        output.set_at(json!(5), 0).await;
        output.set_at(json!(6), 10).await;

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(0, json!(5)), (10, json!(6))]
        );
    }

    #[tokio::test]
    async fn test_throttled_noop_does_not_advance_timestamp() {
        let config = OutputConfig {
            pipe: None,
            throttle: Some(Duration::from_millis(1000)),
            ..OutputConfig::default()
        };
        let output = Output::new(config, test_bus(), None);

        output.set_at(json!(5), 0).await;
        output.set_at(json!(5), 600).await;
        assert_eq!(output.timestamp(), Some(0));
        // The window still counts from the first accepted set, so a call
        // at 999 stays throttled even after several no-ops
        output.set_at(json!(5), 999).await;
        assert_eq!(output.timestamp(), Some(0));
        output.set_at(json!(5), 1000).await;
        assert_eq!(output.timestamp(), Some(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmit_heartbeat() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let config = OutputConfig {
            retransmit: Some(Duration::from_secs(60)),
            ..OutputConfig::bound("p")
        };
        let output = Output::new(config, bus, None);

        output.set(json!("on")).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        advance(Duration::from_secs(60)).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 2);

        advance(Duration::from_secs(60)).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(seen.lock().unwrap()[2].1, json!("on"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_restarts_retransmit_interval() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let config = OutputConfig {
            retransmit: Some(Duration::from_secs(60)),
            ..OutputConfig::bound("p")
        };
        let output = Output::new(config, bus, None);

        output.set(json!(1)).await;
        drain().await;
        advance(Duration::from_secs(30)).await;
        drain().await;

        output.set(json!(2)).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 2);

        // 30s later the original timer would have fired; the restart
        // pushed the next heartbeat to 60s after the second set
        advance(Duration::from_secs(30)).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 2);

        advance(Duration::from_secs(30)).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(seen.lock().unwrap()[2].1, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_retransmit() {
        let bus = test_bus();
        let seen = tap(&bus, "p");
        let config = OutputConfig {
            retransmit: Some(Duration::from_secs(60)),
            ..OutputConfig::bound("p")
        };
        let output = Output::new(config, bus, None);

        output.set(json!(1)).await;
        drain().await;
        output.destroy();
        output.destroy(); // idempotent

        advance(Duration::from_secs(600)).await;
        drain().await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
