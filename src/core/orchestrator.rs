//! 桥接编排器：主控循环
//!
//! 消费传输层事件：
//! - Connected：订阅注册表中的全部 topic，启动 Update 调度（只在首次连接时启动定时器）
//! - Message：查表分发给对应 Action；callback 结束（无论成功失败）后立即重跑其依赖 Update；
//!   未注册的 topic 记日志后丢弃
//! - Disconnected：只记日志，重连由传输层负责
//!
//! 所有出站消息都经由同一个 Publisher 闭包写到总线。单条消息或单次 Update 的失败只记录，不影响其它任务与进程。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{Registry, Scheduler};
use crate::integrations::Publisher;
use crate::transport::{BusClient, BusEvent};

/// 一条入站消息的分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched {
        integration: String,
        ok: bool,
        /// 实际重跑的依赖 Update 数
        refreshed: usize,
    },
    Unrecognized,
}

/// 编排器：持有注册表、总线客户端与调度器
pub struct Orchestrator {
    registry: Arc<Registry>,
    bus: Arc<dyn BusClient>,
    scheduler: Scheduler,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, bus: Arc<dyn BusClient>) -> Self {
        let publisher = bus_publisher(Arc::clone(&bus));
        let scheduler = Scheduler::new(Arc::clone(&registry), publisher);
        Self {
            registry,
            bus,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// 连接建立：逐个订阅（单个失败不影响其它），然后启动调度；返回订阅成功数
    pub async fn on_connect(&self, shutdown: &CancellationToken) -> usize {
        let mut subscribed = 0;
        for topic in self.registry.topics() {
            tracing::info!("Subscribing to topic {}", topic);
            match self.bus.subscribe(&topic).await {
                Ok(()) => subscribed += 1,
                Err(e) => tracing::error!("Subscribe to {} failed: {}", topic, e),
            }
        }
        self.scheduler.start(shutdown.clone());
        subscribed
    }

    /// 分发一条入站消息；空 payload 视为无参数
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        let payload = decode_payload(payload);
        tracing::info!(
            "Received message on topic {}: {}",
            topic,
            payload.as_deref().unwrap_or("(empty)")
        );

        let Some(entry) = self.registry.action(topic) else {
            tracing::info!("Topic {} not recognized, dropping", topic);
            return DispatchOutcome::Unrecognized;
        };

        tracing::info!("Invoking {} of {}", topic, entry.integration);
        let start = Instant::now();
        let result = entry.action.invoke(payload).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "action_audit",
            "topic": topic,
            "integration": entry.integration,
            "ok": result.is_ok(),
            "duration_ms": duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "action");

        match &result {
            Ok(value) => tracing::debug!("Action {} returned {}", topic, value),
            Err(e) => tracing::error!(
                topic,
                integration = %entry.integration,
                category = ?e.category(),
                "Action failed: {}",
                e
            ),
        }

        let mut refreshed = 0;
        for id in &entry.action.dependent_updates {
            if self.scheduler.trigger(id).await.is_some() {
                refreshed += 1;
            }
        }

        DispatchOutcome::Dispatched {
            integration: entry.integration.clone(),
            ok: result.is_ok(),
            refreshed,
        }
    }

    /// 主循环：直到事件流关闭或收到关闭信号
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<BusEvent>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(
            "Orchestrator ready: {} topics, {} updates",
            self.registry.topic_count(),
            self.registry.update_count()
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Orchestrator shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(BusEvent::Connected) => {
                        let subscribed = self.on_connect(&shutdown).await;
                        tracing::info!("Subscribed to {} topics", subscribed);
                    }
                    Some(BusEvent::Message { topic, payload }) => {
                        // 各消息独立执行，交错于挂起点
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.dispatch(&topic, &payload).await;
                        });
                    }
                    Some(BusEvent::Disconnected(reason)) => {
                        tracing::warn!("Bus disconnected: {}", reason);
                    }
                    None => {
                        tracing::info!("Bus event stream closed");
                        break;
                    }
                },
            }
        }
    }
}

/// 出站能力：闭包持有总线客户端，发布失败只记日志
fn bus_publisher(bus: Arc<dyn BusClient>) -> Publisher {
    Publisher::new(move |topic, payload| {
        tracing::debug!("Publishing to {}: {}", topic, payload);
        if let Err(e) = bus.publish(topic, payload) {
            tracing::warn!("Publish to {} failed: {}", topic, e);
        }
    })
}

fn decode_payload(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(payload).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use crate::core::BridgeError;
    use crate::integrations::{Action, Integration, StaticIntegration, Update};
    use crate::transport::MemoryBus;

    fn counting_action(topic: &str, seen: Arc<Mutex<Vec<Option<String>>>>) -> Action {
        Action::new(topic, move |payload| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(payload);
                Ok(json!({}))
            }
        })
    }

    fn counting_update(id: &str, count: Arc<AtomicUsize>) -> Update {
        let topic = format!("home/test/{id}/status");
        Update::new(id, 60_000, move |publisher| {
            let count = count.clone();
            let topic = topic.clone();
            async move {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                publisher.publish_json(&topic, &json!({ "state": "ON", "run": n }))
            }
        })
    }

    fn orchestrator(integrations: Vec<StaticIntegration>) -> (Arc<Orchestrator>, Arc<MemoryBus>, mpsc::UnboundedReceiver<BusEvent>) {
        let integrations: Vec<Arc<dyn Integration>> = integrations
            .into_iter()
            .map(|i| Arc::new(i) as Arc<dyn Integration>)
            .collect();
        let registry = Arc::new(Registry::build(&integrations).unwrap());
        let (bus, events) = MemoryBus::new();
        let bus = Arc::new(bus);
        (Arc::new(Orchestrator::new(registry, bus.clone())), bus, events)
    }

    #[tokio::test]
    async fn test_subscriptions_match_active_actions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (orch, bus, _events) = orchestrator(vec![
            StaticIntegration::new("a")
                .action(counting_action("home/a/one", seen.clone()))
                .action(counting_action("home/a/two", seen.clone()).inactive()),
            StaticIntegration::new("b")
                .action(counting_action("home/b/one", seen.clone()))
                .action(counting_action("home/b/two", seen.clone())),
        ]);

        let subscribed = orch.on_connect(&CancellationToken::new()).await;
        assert_eq!(subscribed, 3);
        assert_eq!(bus.subscriptions(), vec!["home/a/one", "home/b/one", "home/b/two"]);
    }

    #[tokio::test]
    async fn test_colliding_topic_dispatches_to_last_registration() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let (orch, bus, _events) = orchestrator(vec![
            StaticIntegration::new("first").action(counting_action("home/shared/set", first.clone())),
            StaticIntegration::new("second").action(counting_action("home/shared/set", second.clone())),
        ]);

        orch.on_connect(&CancellationToken::new()).await;
        assert_eq!(bus.subscriptions().len(), 1);

        let outcome = orch.dispatch("home/shared/set", b"1").await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched { integration: "second".into(), ok: true, refreshed: 0 }
        );
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dependent_update_refires_after_action() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let (orch, bus, _events) = orchestrator(vec![StaticIntegration::new("router")
            .action(
                counting_action("home/router/wifi/set_enable", seen.clone())
                    .with_dependents(["wifi_status"]),
            )
            .update(counting_update("wifi_status", count.clone()))]);

        let outcome = orch
            .dispatch("home/router/wifi/set_enable", br#"[{"iface":"default_radio0"}]"#)
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched { integration: "router".into(), ok: true, refreshed: 1 }
        );
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Some(r#"[{"iface":"default_radio0"}]"#.to_string())]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            bus.last_published("home/test/wifi_status/status").as_deref(),
            Some(r#"{"run":1,"state":"ON"}"#)
        );
    }

    #[tokio::test]
    async fn test_unrecognized_topic_is_dropped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (orch, bus, _events) = orchestrator(vec![
            StaticIntegration::new("a").action(counting_action("home/a/one", seen.clone())),
        ]);

        let outcome = orch.dispatch("home/unknown/thing", b"{}").await;
        assert_eq!(outcome, DispatchOutcome::Unrecognized);
        assert!(seen.lock().unwrap().is_empty());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_is_passed_as_none() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (orch, _bus, _events) = orchestrator(vec![
            StaticIntegration::new("a").action(counting_action("home/a/one", seen.clone())),
        ]);

        orch.dispatch("home/a/one", b"").await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[None::<String>]);
    }

    #[tokio::test]
    async fn test_failed_action_is_isolated_and_still_refreshes() {
        let count = Arc::new(AtomicUsize::new(0));
        let failing = Action::new("home/a/fail", |_| async {
            Err(BridgeError::InvalidPayload("expected a JSON array".into()))
        })
        .with_dependents(["a_status", "not_registered"]);
        let (orch, _bus, _events) = orchestrator(vec![StaticIntegration::new("a")
            .action(failing)
            .update(counting_update("a_status", count.clone()))]);

        let outcome = orch.dispatch("home/a/fail", b"oops").await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched { integration: "a".into(), ok: false, refreshed: 1 }
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_connects_dispatches_and_stops() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let (orch, bus, events) = orchestrator(vec![StaticIntegration::new("a")
            .action(counting_action("home/a/one", seen.clone()))
            .update(counting_update("a_status", count.clone()))]);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(orch.clone().run(events, shutdown.clone()));

        bus.inject(BusEvent::Connected);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.subscriptions(), vec!["home/a/one"]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(orch.scheduler().is_started());

        bus.deliver("home/a/one", "hello");
        bus.deliver("home/nobody/listens", "x");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some("hello".to_string())]);

        // 重连只重新订阅，不会叠加定时器
        bus.inject(BusEvent::Connected);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.subscriptions().len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
