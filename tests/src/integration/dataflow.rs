//! # Dataflow Integration
//!
//! Output → pipe → Input scenarios across node boundaries, including the
//! canonical expiry round trip and a multi-hop component chain.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mesh_bus::{Bus, LoopbackBus};
    use mesh_core::{
        Component, ComponentConfig, Host, HostHandle, Input, InputConfig, InputEvent, Logger,
        Output, OutputConfig, Ports, Teardown,
    };
    use mesh_types::log::MSGID_NO_LISTENERS;
    use mesh_types::{LogRecord, NodeIdentity};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::advance;

    fn two_nodes() -> (Arc<LoopbackBus>, Arc<LoopbackBus>) {
        let a = Arc::new(LoopbackBus::new(NodeIdentity::new("n1", "node-one")));
        let b = Arc::new(a.join(NodeIdentity::new("n2", "node-two")));
        (a, b)
    }

    async fn drain() {
        for _ in 0..30 {
            tokio::task::yield_now().await;
        }
    }

    /// Spin until a condition holds or a second passes.
    async fn eventually(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_to_input_with_expiry() {
        crate::init_tracing();
        let (a, b) = two_nodes();
        let input = Input::new(
            InputConfig {
                expire: Some(Duration::from_millis(1000)),
                ..InputConfig::bound("p")
            },
            b,
            None,
        );
        let mut events = input.events();
        let output = Output::new(OutputConfig::bound("p"), a, None);

        output.set(json!(42)).await;
        drain().await;
        assert_eq!(input.value(), Some(json!(42)));
        assert!(!input.expired());
        let source = input.source().expect("source");
        assert_eq!(source.node_id, "n1");
        assert_eq!(source.pipe, "p");

        advance(Duration::from_millis(1100)).await;
        drain().await;
        assert!(input.expired());

        let seen: Vec<InputEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        let updates = seen
            .iter()
            .filter(|e| matches!(e, InputEvent::Update(_)))
            .count();
        assert_eq!(updates, 1, "expiry must not produce further updates");
        assert!(seen.contains(&InputEvent::Expire));
    }

    /// Doubles every changed value from its input onto its output.
    struct Doubler;

    #[async_trait]
    impl Component for Doubler {
        async fn factory(
            &self,
            _config: &ComponentConfig,
            inputs: &Ports<Arc<Input>>,
            outputs: &Ports<Arc<Output>>,
            _logger: &Logger,
            _host: &HostHandle,
        ) -> anyhow::Result<Option<Teardown>> {
            let mut events = inputs[0].events();
            let output = Arc::clone(&outputs[0]);
            let forward = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let InputEvent::Change(sample) = event {
                        if let Some(n) = sample.value.as_i64() {
                            output.set(json!(n * 2)).await;
                        }
                    }
                }
            });
            Ok(Some(Box::new(move || {
                Box::pin(async move {
                    forward.abort();
                })
            })))
        }
    }

    #[tokio::test]
    async fn test_component_chain_across_nodes() {
        crate::init_tracing();
        let (a, b) = two_nodes();
        let host = Host::new(Arc::clone(&a) as Arc<dyn Bus>);
        let config = ComponentConfig {
            name: Some("doubler".to_owned()),
            inputs: vec![InputConfig::bound("chain.in")],
            outputs: vec![OutputConfig::bound("chain.out")],
            ..ComponentConfig::default()
        };
        host.run(&Doubler, config).await.expect("run");

        let sink = Input::new(
            InputConfig::bound("chain.out"),
            Arc::clone(&b) as Arc<dyn Bus>,
            None,
        );

        b.emit("chain.in", mesh_types::time::now_ms(), json!(21)).await;
        eventually(|| sink.value() == Some(json!(42))).await;

        // After shutdown the chain is dead
        host.shutdown().await;
        assert_eq!(b.emit("chain.in", mesh_types::time::now_ms(), json!(50)).await, 0);
        drain().await;
        assert_eq!(sink.value(), Some(json!(42)));
    }

    #[tokio::test]
    async fn test_spy_observer_keeps_no_listener_warning_alive() {
        crate::init_tracing();
        let (a, b) = two_nodes();

        // A diagnostic tap on the pipe, invisible to the publisher
        let spy = Input::new(
            InputConfig {
                spy: true,
                ..InputConfig::bound("q")
            },
            Arc::clone(&b) as Arc<dyn Bus>,
            None,
        );

        // A third node consumes n1's warn-level log stream
        let log_bus: Arc<LoopbackBus> = Arc::new(a.join(NodeIdentity::new("n3", "logs")));
        let log_ipc = mesh_core::Ipc::new(log_bus);
        log_ipc.subscribe("multicast.log.n1.warn");
        let mut log_sub = log_ipc.messages(mesh_core::MessageFilter::of("log"));

        let ipc = mesh_core::Ipc::new(Arc::clone(&a) as Arc<dyn Bus>);
        let logger = Logger::new(ipc, "c1", "emitter");
        let output = Output::new(
            OutputConfig::bound("q"),
            Arc::clone(&a) as Arc<dyn Bus>,
            Some(logger),
        );

        output.set(json!("unheard")).await;
        eventually(|| spy.value() == Some(json!("unheard"))).await;

        // Zero counted listeners: the publish still warns
        let envelope = tokio::time::timeout(Duration::from_secs(1), log_sub.recv())
            .await
            .expect("timeout")
            .expect("warning");
        let record = LogRecord::from_payload(&envelope.payload).expect("record");
        assert_eq!(record.message_id.as_deref(), Some(MSGID_NO_LISTENERS));
    }
}
