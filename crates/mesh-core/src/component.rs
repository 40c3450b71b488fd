//! # Component Host
//!
//! A component is the unit of application logic: a factory that gets its
//! configuration, its input and output endpoints, a logger bound to its
//! identity and a handle to the host, wires something between them and
//! optionally hands back a teardown.
//!
//! The [`Host`] owns the node-level plumbing (IPC, advertiser, registry)
//! and drives the lifecycle: normalize the configuration, run the
//! component's `check`, build the endpoints, invoke the factory, register
//! and advertise. On [`Host::shutdown`] every component's teardown runs
//! *before* its endpoints are destroyed, so application logic can still
//! publish farewell values.

use crate::advert::Advertiser;
use crate::input::{Input, InputConfig};
use crate::ipc::Ipc;
use crate::logger::Logger;
use crate::output::{Output, OutputConfig};
use async_trait::async_trait;
use mesh_bus::Bus;
use mesh_types::NodeIdentity;
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

/// Default name for components that do not set one.
const UNNAMED: &str = "<unnamed>";

/// Errors surfaced while running a component.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component's pre-run check rejected the configuration.
    #[error("component check failed: {0}")]
    CheckFailed(anyhow::Error),

    /// The component's factory failed; its endpoints were destroyed.
    #[error("component factory failed: {0}")]
    FactoryFailed(anyhow::Error),
}

/// Configuration of one component instance.
#[derive(Clone, Default)]
pub struct ComponentConfig {
    /// Instance id. Defaults to 8 random bytes, hex-encoded.
    pub id: Option<String>,

    /// Instance name. Defaults to `"<unnamed>"`.
    pub name: Option<String>,

    /// Input endpoints, in positional order.
    pub inputs: Vec<InputConfig>,

    /// Output endpoints, in positional order.
    pub outputs: Vec<OutputConfig>,

    /// Free-form component options, advertised as-is.
    pub options: Map<String, Value>,
}

impl ComponentConfig {
    /// Fill in the defaulted identity fields.
    fn normalize(&mut self) {
        if self.id.is_none() {
            self.id = Some(random_id());
        }
        if self.name.is_none() {
            self.name = Some(UNNAMED.to_owned());
        }
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Advertised description of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Endpoint name inside the component, if any.
    pub name: Option<String>,
    /// Pipe the endpoint is bound to, if any.
    pub pipe: Option<String>,
}

/// Advertised description of one running component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInfo {
    /// Instance id.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Free-form component options.
    pub options: Map<String, Value>,
    /// Input endpoints, in positional order.
    pub inputs: Vec<PortInfo>,
    /// Output endpoints, in positional order.
    pub outputs: Vec<PortInfo>,
}

impl ComponentInfo {
    /// Render the advertisement payload.
    #[must_use]
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Ordered endpoint collection, addressable by index and by name.
///
/// When two endpoints share a name, the later one wins name lookup; both
/// stay reachable positionally.
pub struct Ports<T> {
    items: Vec<T>,
    names: HashMap<String, usize>,
}

impl<T> Ports<T> {
    fn new(items: Vec<T>, name_of: fn(&T) -> Option<&str>) -> Self {
        let mut names = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            if let Some(name) = name_of(item) {
                names.insert(name.to_owned(), index);
            }
        }
        Self { items, names }
    }

    /// Number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Endpoint at a position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Endpoint by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&T> {
        self.names.get(name).and_then(|&index| self.items.get(index))
    }

    /// Iterate the endpoints in positional order.
    pub fn entries(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> std::ops::Index<usize> for Ports<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

/// Future returned by a teardown closure.
pub type TeardownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cleanup handed back by a factory, run at shutdown before the
/// component's endpoints are destroyed.
pub type Teardown = Box<dyn FnOnce() -> TeardownFuture + Send>;

/// Node-level services a factory may use beyond its own endpoints.
#[derive(Clone)]
pub struct HostHandle {
    bus: Arc<dyn Bus>,
    ipc: Arc<Ipc>,
}

impl HostHandle {
    /// Identity of the local node.
    #[must_use]
    pub fn identity(&self) -> &NodeIdentity {
        self.bus.identity()
    }

    /// The node's IPC instance, for control-plane traffic.
    #[must_use]
    pub fn ipc(&self) -> &Arc<Ipc> {
        &self.ipc
    }

    /// The raw bus, for endpoints created outside the host.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }
}

/// Application logic hosted by a node.
#[async_trait]
pub trait Component: Send + Sync {
    /// Validate the configuration before any endpoint is built.
    async fn check(&self, _config: &ComponentConfig) -> anyhow::Result<()> {
        Ok(())
    }

    /// Wire the component between its endpoints.
    ///
    /// Returns an optional teardown, run at shutdown while the endpoints
    /// are still alive.
    async fn factory(
        &self,
        config: &ComponentConfig,
        inputs: &Ports<Arc<Input>>,
        outputs: &Ports<Arc<Output>>,
        logger: &Logger,
        host: &HostHandle,
    ) -> anyhow::Result<Option<Teardown>>;
}

struct RunningComponent {
    info: ComponentInfo,
    inputs: Ports<Arc<Input>>,
    outputs: Ports<Arc<Output>>,
    teardown: Option<Teardown>,
}

/// Runs components on one node.
pub struct Host {
    bus: Arc<dyn Bus>,
    ipc: Arc<Ipc>,
    advertiser: Advertiser,
    handle: HostHandle,
    components: Mutex<Vec<RunningComponent>>,
}

impl Host {
    /// Create a host on a bus. Brings up IPC and the advertiser.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        let ipc = Ipc::new(Arc::clone(&bus));
        let advertiser = Advertiser::new(Arc::clone(&ipc));
        let handle = HostHandle {
            bus: Arc::clone(&bus),
            ipc: Arc::clone(&ipc),
        };
        Self {
            bus,
            ipc,
            advertiser,
            handle,
            components: Mutex::new(Vec::new()),
        }
    }

    /// The node's IPC instance.
    #[must_use]
    pub fn ipc(&self) -> &Arc<Ipc> {
        &self.ipc
    }

    /// Snapshot of the running components.
    #[must_use]
    pub fn components(&self) -> Vec<ComponentInfo> {
        self.lock().iter().map(|rc| rc.info.clone()).collect()
    }

    /// Run a component.
    ///
    /// Normalizes the configuration, runs the component's `check`, builds
    /// its endpoints, invokes the factory and advertises the instance.
    ///
    /// # Errors
    ///
    /// [`ComponentError::CheckFailed`] if the check rejects the
    /// configuration; [`ComponentError::FactoryFailed`] if the factory
    /// fails, in which case the freshly built endpoints are destroyed.
    pub async fn run(
        &self,
        component: &dyn Component,
        mut config: ComponentConfig,
    ) -> Result<String, ComponentError> {
        config.normalize();
        let id = config.id.clone().unwrap_or_default();
        let name = config.name.clone().unwrap_or_default();

        component
            .check(&config)
            .await
            .map_err(ComponentError::CheckFailed)?;

        let logger = Logger::new(Arc::clone(&self.ipc), id.clone(), name.clone());
        let inputs = Ports::new(
            config
                .inputs
                .iter()
                .cloned()
                .map(|c| Arc::new(Input::new(c, Arc::clone(&self.bus), Some(logger.clone()))))
                .collect(),
            |input: &Arc<Input>| input.name(),
        );
        let outputs = Ports::new(
            config
                .outputs
                .iter()
                .cloned()
                .map(|c| Arc::new(Output::new(c, Arc::clone(&self.bus), Some(logger.clone()))))
                .collect(),
            |output: &Arc<Output>| output.name(),
        );

        let teardown = match component
            .factory(&config, &inputs, &outputs, &logger, &self.handle)
            .await
        {
            Ok(teardown) => teardown,
            Err(err) => {
                for input in inputs.entries() {
                    input.destroy();
                }
                for output in outputs.entries() {
                    output.destroy();
                }
                return Err(ComponentError::FactoryFailed(err));
            }
        };

        let info = ComponentInfo {
            id: id.clone(),
            name: name.clone(),
            options: config.options.clone(),
            inputs: config
                .inputs
                .iter()
                .map(|c| PortInfo {
                    name: c.name.clone(),
                    pipe: c.pipe.clone(),
                })
                .collect(),
            outputs: config
                .outputs
                .iter()
                .map(|c| PortInfo {
                    name: c.name.clone(),
                    pipe: c.pipe.clone(),
                })
                .collect(),
        };
        self.advertiser.component_added(&info);
        info!(component = %name, id = %id, "component started");

        self.lock().push(RunningComponent {
            info,
            inputs,
            outputs,
            teardown,
        });
        Ok(id)
    }

    /// Tear everything down.
    ///
    /// For each component: run its teardown, then destroy its endpoints,
    /// then retract its advertisement. Leaves the registry empty and
    /// stops the advertiser.
    pub async fn shutdown(&self) {
        let components: Vec<RunningComponent> = self.lock().drain(..).collect();
        for mut rc in components {
            if let Some(teardown) = rc.teardown.take() {
                teardown().await;
            }
            for input in rc.inputs.entries() {
                input.destroy();
            }
            for output in rc.outputs.entries() {
                output.destroy();
            }
            self.advertiser.component_removed(&rc.info.id);
            info!(component = %rc.info.name, id = %rc.info.id, "component stopped");
        }
        self.advertiser.destroy();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RunningComponent>> {
        self.components.lock().unwrap_or_else(|e| e.into_inner())
    }
}
