//! Homebus - MQTT 与家用设备 JSON-RPC 之间的桥接服务
//!
//! 入口：初始化日志、加载配置、安装集成、连接 broker，并运行编排主循环直到收到关闭信号。
//! 可选参数：额外的配置文件路径（覆盖 config/default.toml 中的键）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use homebus::{
    config::load_config,
    core::{run_with_graceful_shutdown, BusDisconnect, Orchestrator, Registry, ShutdownCoordinator, ShutdownManager},
    integrations, observability,
    transport::{BusClient, MqttTransport},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    // 集成构造失败（如缺少凭据）或没有任何集成时直接退出
    let installed = integrations::install(&cfg).context("Failed to install integrations")?;
    let registry = Arc::new(Registry::build(&installed).context("Failed to build registry")?);

    let shutdown = Arc::new(ShutdownManager::new());
    let (transport, events) =
        MqttTransport::connect(&cfg.mqtt).context("Failed to start MQTT client")?;

    let bus: Arc<dyn BusClient> = transport.clone();
    let orchestrator = Arc::new(Orchestrator::new(registry, bus));

    // 编排循环与定时器随关闭 token 退出后，再断开 broker
    let mut coordinator =
        ShutdownCoordinator::new(Duration::from_secs(cfg.mqtt.disconnect_timeout_secs));
    coordinator.register(BusDisconnect::new(transport));

    let reason = run_with_graceful_shutdown(
        Arc::clone(&shutdown),
        orchestrator.run(events, shutdown.token()),
        || coordinator.run_cleanup(),
    )
    .await;
    tracing::info!(?reason, "homebus stopped");

    Ok(())
}
