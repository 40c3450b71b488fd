//! # Input Endpoint
//!
//! The consumer side of a pipe. An input tracks the latest accepted
//! value, its origin timestamp and sender, and fans out three event
//! kinds to subscribers:
//!
//! - `Update` on every accepted value
//! - `Change` immediately after an `Update` whose value differed; a
//!   `Change` never precedes its `Update`
//! - `Expire` when the value outlived its configured expire duration
//!
//! Expiry is drift-compensated: values are timestamped at their origin
//! node, so the timer runs for `expire - (now - timestamp)`, absorbing
//! clock skew and transit delay. A negative remainder fires immediately.
//!
//! Inbound events are processed by a single worker task fed from a
//! queue, so per-endpoint ordering matches transport delivery order even
//! when an asynchronous checkpoint suspends processing.

use crate::logger::Logger;
use mesh_bus::{Bus, ListenerId, ListenerOpts};
use mesh_types::log::{MSGID_CHECKPOINT_REJECTED, MSGID_VALUE_EXPIRED};
use mesh_types::{time, LogLevel};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::trace;

/// Event fan-out buffer per endpoint.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Origin metadata attached to an accepted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSource {
    /// Sender node id.
    pub node_id: String,
    /// Sender node name.
    pub node_name: String,
    /// Pipe the value arrived on.
    pub pipe: String,
}

/// A timestamped value with its origin metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The value itself.
    pub value: Value,
    /// Origin-node timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Origin metadata; `None` for locally fed values.
    pub source: Option<SampleSource>,
}

/// Events emitted by an input endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// An accepted value, emitted on every update.
    Update(Sample),
    /// Emitted after `Update` iff the value differed from the previous one.
    Change(Sample),
    /// The value passed its expire duration without renewal.
    Expire,
}

/// Future returned by a checkpoint.
pub type CheckpointFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Asynchronous validator/transform applied before a value is committed.
///
/// Receives `(value, timestamp, source)`. The returned value is what gets
/// committed, so a checkpoint may rewrite it. An `Err` discards the
/// update entirely: no state is mutated and no events are emitted.
pub type Checkpoint =
    Arc<dyn Fn(Value, u64, Option<SampleSource>) -> CheckpointFuture + Send + Sync>;

/// Configuration of an input endpoint.
#[derive(Clone)]
pub struct InputConfig {
    /// Name for addressing the endpoint inside its component.
    pub name: Option<String>,

    /// Pipe to bind. Absent means the endpoint is purely local.
    pub pipe: Option<String>,

    /// Duration after which an unrenewed value is flagged stale.
    pub expire: Option<Duration>,

    /// Fallback value: seeded at construction and restored on expiry.
    pub default: Option<Value>,

    /// Asynchronous validator/transform for inbound values.
    pub checkpoint: Option<Checkpoint>,

    /// Level for expiration warnings. `None` suppresses them.
    pub log_level_expiration: Option<LogLevel>,

    /// Level for checkpoint rejections. `None` suppresses them.
    pub log_level_checkpoint: Option<LogLevel>,

    /// Observe the pipe without being counted as a listener.
    pub spy: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            name: None,
            pipe: None,
            expire: None,
            default: None,
            checkpoint: None,
            log_level_expiration: Some(LogLevel::Warn),
            log_level_checkpoint: Some(LogLevel::Error),
            spy: false,
        }
    }
}

impl InputConfig {
    /// Configuration bound to a pipe, everything else default.
    #[must_use]
    pub fn bound(pipe: impl Into<String>) -> Self {
        Self {
            pipe: Some(pipe.into()),
            ..Self::default()
        }
    }
}

struct InputState {
    value: Option<Value>,
    timestamp: Option<u64>,
    source: Option<SampleSource>,
    expired: bool,
    /// Bumped on every accepted update; stale timer fires compare against
    /// it and back off.
    epoch: u64,
    expire_timer: Option<JoinHandle<()>>,
    destroyed: bool,
}

struct InputShared {
    pipe: Option<String>,
    expire: Option<Duration>,
    default: Option<Value>,
    checkpoint: Option<Checkpoint>,
    log_level_expiration: Option<LogLevel>,
    log_level_checkpoint: Option<LogLevel>,
    logger: Option<Logger>,
    events: broadcast::Sender<InputEvent>,
    state: Mutex<InputState>,
}

impl InputShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, InputState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pipe_label(&self) -> &str {
        self.pipe.as_deref().unwrap_or("<local>")
    }

    async fn process(self: &Arc<Self>, mut sample: Sample) {
        if let Some(checkpoint) = &self.checkpoint {
            match checkpoint(sample.value.clone(), sample.timestamp, sample.source.clone()).await {
                Ok(value) => sample.value = value,
                Err(err) => {
                    trace!(pipe = self.pipe_label(), %err, "checkpoint rejected value");
                    if let (Some(level), Some(logger)) = (self.log_level_checkpoint, &self.logger) {
                        logger.log(
                            level,
                            format!(
                                "checkpoint rejected value on pipe '{}': {err}",
                                self.pipe_label()
                            ),
                            Some(MSGID_CHECKPOINT_REJECTED),
                        );
                    }
                    return;
                }
            }
        }

        let changed;
        {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            changed = state.value.as_ref() != Some(&sample.value);
            state.value = Some(sample.value.clone());
            state.timestamp = Some(sample.timestamp);
            state.source = sample.source.clone();
            state.expired = false;
            state.epoch += 1;
            if let Some(timer) = state.expire_timer.take() {
                timer.abort();
            }
            if let Some(expire) = self.expire {
                let drift = time::now_ms() as i64 - sample.timestamp as i64;
                let delay = (expire.as_millis() as i64 - drift).max(0) as u64;
                let shared = Arc::clone(self);
                let epoch = state.epoch;
                state.expire_timer =
                    Some(tokio::spawn(
                        async move { shared.expire_after(epoch, delay).await },
                    ));
            }
        }

        let _ = self.events.send(InputEvent::Update(sample.clone()));
        if changed {
            let _ = self.events.send(InputEvent::Change(sample));
        }
    }

    async fn expire_after(self: Arc<Self>, epoch: u64, delay_ms: u64) {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        {
            let mut state = self.lock();
            // A newer value or a destroy already superseded this timer
            if state.destroyed || state.epoch != epoch || state.expired {
                return;
            }
            state.expired = true;
            if let Some(default) = &self.default {
                state.value = Some(default.clone());
                state.timestamp = None;
            }
        }
        let _ = self.events.send(InputEvent::Expire);
        if let (Some(level), Some(logger)) = (self.log_level_expiration, &self.logger) {
            logger.log(
                level,
                format!("value on pipe '{}' expired", self.pipe_label()),
                Some(MSGID_VALUE_EXPIRED),
            );
        }
    }
}

/// Consumer-side dataflow endpoint bound to a pipe.
///
/// Owned exclusively by its component; [`Input::destroy`] cancels the
/// worker and any pending expire timer.
pub struct Input {
    name: Option<String>,
    spy: bool,
    shared: Arc<InputShared>,
    feed_tx: mpsc::UnboundedSender<Sample>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<(String, ListenerId)>>,
    bus: Arc<dyn Bus>,
}

impl Input {
    /// Create an input endpoint.
    ///
    /// If the config names a pipe, a bus listener is attached; otherwise
    /// the endpoint only sees values passed to [`Input::feed`]. A
    /// configured `default` seeds the value before any event arrives.
    #[must_use]
    pub fn new(config: InputConfig, bus: Arc<dyn Bus>, logger: Option<Logger>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(InputShared {
            pipe: config.pipe.clone(),
            expire: config.expire,
            default: config.default.clone(),
            checkpoint: config.checkpoint,
            log_level_expiration: config.log_level_expiration,
            log_level_checkpoint: config.log_level_checkpoint,
            logger,
            events,
            state: Mutex::new(InputState {
                value: config.default,
                timestamp: None,
                source: None,
                expired: false,
                epoch: 0,
                expire_timer: None,
                destroyed: false,
            }),
        });

        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<Sample>();
        let worker = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some(sample) = feed_rx.recv().await {
                    shared.process(sample).await;
                }
            })
        };

        let listener = config.pipe.as_ref().map(|pipe| {
            let tx = feed_tx.clone();
            let pipe_name = pipe.clone();
            let handler = Arc::new(move |event: mesh_bus::BusEvent| {
                let sample = Sample {
                    value: event.value,
                    timestamp: event.timestamp,
                    source: Some(SampleSource {
                        node_id: event.source.id,
                        node_name: event.source.name,
                        pipe: pipe_name.clone(),
                    }),
                };
                // Err only if the worker is gone, i.e. destroyed
                let _ = tx.send(sample);
            });
            let id = bus.on(pipe, handler, ListenerOpts { spy: config.spy });
            (pipe.clone(), id)
        });

        Self {
            name: config.name,
            spy: config.spy,
            shared,
            feed_tx,
            worker: Mutex::new(Some(worker)),
            listener: Mutex::new(listener),
            bus,
        }
    }

    /// Name of the endpoint inside its component, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pipe the endpoint is bound to, if any.
    #[must_use]
    pub fn pipe(&self) -> Option<&str> {
        self.shared.pipe.as_deref()
    }

    /// Whether this endpoint observes without being counted.
    #[must_use]
    pub fn is_spy(&self) -> bool {
        self.spy
    }

    /// Latest accepted value (or the configured default).
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.shared.lock().value.clone()
    }

    /// Origin timestamp of the latest accepted value.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.shared.lock().timestamp
    }

    /// Origin metadata of the latest accepted value.
    #[must_use]
    pub fn source(&self) -> Option<SampleSource> {
        self.shared.lock().source.clone()
    }

    /// Whether the value has passed its expire duration.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.shared.lock().expired
    }

    /// Milliseconds since the latest value was produced at its origin.
    ///
    /// `None` if no timestamp has ever been set.
    #[must_use]
    pub fn age(&self) -> Option<u64> {
        self.shared
            .lock()
            .timestamp
            .map(|ts| time::now_ms().saturating_sub(ts))
    }

    /// Subscribe to this endpoint's events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<InputEvent> {
        self.shared.events.subscribe()
    }

    /// Feed a value locally, as if it arrived on the pipe.
    pub fn feed(&self, timestamp: u64, value: Value, source: Option<SampleSource>) {
        let _ = self.feed_tx.send(Sample {
            value,
            timestamp,
            source,
        });
    }

    /// Tear the endpoint down: cancel the worker and any pending expire
    /// timer, detach the bus listener. Idempotent.
    pub fn destroy(&self) {
        {
            let mut state = self.shared.lock();
            state.destroyed = true;
            if let Some(timer) = state.expire_timer.take() {
                timer.abort();
            }
        }
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            worker.abort();
        }
        if let Some((pipe, id)) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.bus.remove_listener(&pipe, id);
        }
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.destroy();
    }
}
