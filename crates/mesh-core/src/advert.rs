//! # Component Advertisement
//!
//! On-demand introspection of the components a node runs. Debug tooling
//! subscribes to `multicast.adv`; the advertiser watches that address's
//! listener count and only speaks when somebody listens:
//!
//! - a count increase triggers a full advertisement of every registered
//!   component, in registration order
//! - a component registered while listeners exist is advertised on its
//!   own
//! - with zero listeners the advertiser stays silent
//!
//! Serialized advertisements are cached per component id and evicted on
//! removal, so repeated listener joins do not re-serialize unchanged
//! components.

use crate::component::ComponentInfo;
use crate::ipc::{Ipc, ObserverHandle};
use mesh_types::address::ADV_MULTICAST;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

enum Task {
    /// Advertise every registered component, in registration order.
    All,
    /// Advertise one component by id.
    One(String),
}

struct AdvertState {
    listener_count: usize,
    /// Registration order of the live component ids.
    order: Vec<String>,
    /// Serialized advertisement per component id.
    ads: HashMap<String, Map<String, Value>>,
}

fn lock(state: &Mutex<AdvertState>) -> std::sync::MutexGuard<'_, AdvertState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Advertises a node's live components to interested debug listeners.
///
/// One instance per node runtime. [`Advertiser::destroy`] (or drop) stops
/// the listener-count observation and the send worker.
pub struct Advertiser {
    state: Arc<Mutex<AdvertState>>,
    tx: mpsc::UnboundedSender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
    observer: Mutex<Option<ObserverHandle>>,
}

impl Advertiser {
    /// Attach an advertiser to an IPC instance.
    ///
    /// Starts observing `multicast.adv`; if listeners already exist, the
    /// current (possibly empty) component set is advertised right away.
    #[must_use]
    pub fn new(ipc: Arc<Ipc>) -> Self {
        let state = Arc::new(Mutex::new(AdvertState {
            listener_count: 0,
            order: Vec::new(),
            ads: HashMap::new(),
        }));

        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker = {
            let ipc = Arc::clone(&ipc);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    let ads: Vec<Map<String, Value>> = {
                        let state = lock(&state);
                        match task {
                            Task::All => state
                                .order
                                .iter()
                                .filter_map(|id| state.ads.get(id).cloned())
                                .collect(),
                            Task::One(id) => state.ads.get(&id).cloned().into_iter().collect(),
                        }
                    };
                    // Sends stay sequential so listeners see registration order
                    for ad in ads {
                        if let Err(err) = ipc.send(ADV_MULTICAST, "adv", ad).await {
                            trace!(%err, "advertisement dropped");
                        }
                    }
                }
            })
        };

        let observer = {
            let state = Arc::clone(&state);
            let tx = tx.clone();
            ipc.observe(ADV_MULTICAST, move |new_count, old_count| {
                lock(&state).listener_count = new_count;
                if new_count > old_count {
                    let _ = tx.send(Task::All);
                }
            })
        };

        Self {
            state,
            tx,
            worker: Mutex::new(Some(worker)),
            observer: Mutex::new(Some(observer)),
        }
    }

    /// Register a component and advertise it if anybody listens.
    pub fn component_added(&self, info: &ComponentInfo) {
        let interested = {
            let mut state = lock(&self.state);
            state.order.push(info.id.clone());
            state.ads.insert(info.id.clone(), info.to_payload());
            state.listener_count > 0
        };
        if interested {
            let _ = self.tx.send(Task::One(info.id.clone()));
        }
    }

    /// Forget a component. Its cached advertisement is evicted.
    pub fn component_removed(&self, id: &str) {
        let mut state = lock(&self.state);
        state.order.retain(|c| c != id);
        state.ads.remove(id);
    }

    /// Stop observing and advertising. Idempotent.
    pub fn destroy(&self) {
        if let Some(observer) = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            observer.stop();
        }
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            worker.abort();
        }
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.destroy();
    }
}
