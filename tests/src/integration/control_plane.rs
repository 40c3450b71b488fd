//! # Control-Plane Integration
//!
//! IPC envelopes, the distributed log stream and component advertisement,
//! exercised across node boundaries.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mesh_bus::{Bus, LoopbackBus};
    use mesh_core::{
        Component, ComponentConfig, Host, HostHandle, Input, InputConfig, Ipc, Logger,
        MessageFilter, Output, OutputConfig, Ports, Teardown,
    };
    use mesh_types::{address, LogRecord, NodeIdentity};
    use serde_json::{json, Map};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn mesh() -> (Arc<LoopbackBus>, Arc<LoopbackBus>) {
        let a = Arc::new(LoopbackBus::new(NodeIdentity::new("n1", "node-one")));
        let b = Arc::new(a.join(NodeIdentity::new("n2", "node-two")));
        (a, b)
    }

    async fn drain() {
        for _ in 0..30 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unicast_round_trip() {
        crate::init_tracing();
        let (a, b) = mesh();
        let ipc_a = Ipc::new(a);
        let ipc_b = Ipc::new(b);
        let mut sub = ipc_b.messages(MessageFilter::of("ping"));

        let mut payload = Map::new();
        payload.insert("x".to_owned(), json!(1));
        let count = ipc_a
            .send(&address::unicast("n2"), "ping", payload)
            .await
            .expect("send");
        // The implicit unicast subscription is the one counted listener
        assert_eq!(count, 1);

        let envelope = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timeout")
            .expect("envelope");
        assert_eq!(envelope.msg_type, "ping");
        assert_eq!(envelope.node_id, "n1");
        assert_eq!(envelope.node_name, "node-one");
        assert_eq!(envelope.payload["x"], json!(1));
    }

    /// Announces itself once on startup.
    struct Announcer;

    #[async_trait]
    impl Component for Announcer {
        async fn factory(
            &self,
            _config: &ComponentConfig,
            _inputs: &Ports<Arc<Input>>,
            _outputs: &Ports<Arc<Output>>,
            logger: &Logger,
            _host: &HostHandle,
        ) -> anyhow::Result<Option<Teardown>> {
            logger.info("component online", None);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_component_log_reaches_remote_consumer() {
        crate::init_tracing();
        let (a, b) = mesh();
        let consumer = Ipc::new(b);
        consumer.subscribe("multicast.log.n1.info");
        let mut sub = consumer.messages(MessageFilter::of("log"));

        let host = Host::new(a);
        let config = ComponentConfig {
            name: Some("announcer".to_owned()),
            ..ComponentConfig::default()
        };
        let id = host.run(&Announcer, config).await.expect("run");

        let envelope = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timeout")
            .expect("envelope");
        assert_eq!(envelope.node_id, "n1");
        let record = LogRecord::from_payload(&envelope.payload).expect("record");
        assert_eq!(record.component_id, id);
        assert_eq!(record.component_name, "announcer");
        assert_eq!(record.message, "component online");
    }

    #[tokio::test]
    async fn test_advertisements_follow_debug_listener() {
        crate::init_tracing();
        let (a, b) = mesh();
        let host = Host::new(a);
        let config = ComponentConfig {
            name: Some("first".to_owned()),
            inputs: vec![InputConfig {
                name: Some("in".to_owned()),
                ..InputConfig::bound("pipe.in")
            }],
            outputs: vec![OutputConfig::bound("pipe.out")],
            ..ComponentConfig::default()
        };
        host.run(&Announcer, config).await.expect("run");
        drain().await;

        // The debug listener joins after the fact and still learns about
        // everything already running
        let debug = Ipc::new(b);
        debug.subscribe(address::ADV_MULTICAST);
        let mut ads = debug.messages(MessageFilter::of("adv"));

        let ad = timeout(Duration::from_secs(1), ads.recv())
            .await
            .expect("timeout")
            .expect("advertisement");
        assert_eq!(ad.payload_str("name"), Some("first"));
        assert_eq!(ad.payload["inputs"], json!([{"name": "in", "pipe": "pipe.in"}]));
        assert_eq!(ad.payload["outputs"], json!([{"name": null, "pipe": "pipe.out"}]));

        // A component started while the listener is attached is advertised
        // on its own
        let late = ComponentConfig {
            name: Some("late".to_owned()),
            ..ComponentConfig::default()
        };
        host.run(&Announcer, late).await.expect("run");
        let ad = timeout(Duration::from_secs(1), ads.recv())
            .await
            .expect("timeout")
            .expect("advertisement");
        assert_eq!(ad.payload_str("name"), Some("late"));
    }

    #[tokio::test]
    async fn test_duplicate_envelope_is_suppressed_once_per_sender() {
        crate::init_tracing();
        let (a, b) = mesh();
        let ipc_b = Ipc::new(Arc::clone(&b) as Arc<dyn Bus>);
        ipc_b.subscribe("telemetry");
        let mut sub = ipc_b.messages(MessageFilter::of("reading"));

        // A replayed envelope: same sender, same seq
        let replay = json!({
            "msgType": "reading",
            "seq": 7,
            "value": 3
        });
        let addr = address::prefixed("telemetry");
        a.emit(&addr, 1, replay.clone()).await;
        a.emit(&addr, 2, replay).await;
        drain().await;

        let first = sub.try_recv().unwrap().expect("first delivery");
        assert_eq!(first.payload["value"], json!(3));
        assert!(
            sub.try_recv().unwrap().is_none(),
            "replayed seq must be dropped"
        );
    }
}
