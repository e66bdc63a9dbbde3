//! 优雅关闭
//!
//! 关闭 token 被取消后，编排循环与全部 Update 定时器随之退出；
//! 之后按注册顺序执行清理任务（断开 MQTT 连接），单个任务有超时上限，失败只记日志。

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::BridgeError;
use crate::transport::MqttTransport;

/// 关闭原因（只记录第一个）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 总线事件流结束，编排循环自行退出
    BusClosed,
}

/// 关闭信号：一个 token 加上触发原因
pub struct ShutdownManager {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
        }
    }

    /// 交给编排循环与调度器
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!(?reason, "Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Ctrl+C / SIGTERM 触发关闭
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        manager.shutdown(ShutdownReason::Terminate);
                    }
                    Err(e) => tracing::warn!("SIGTERM handler not installed: {}", e),
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> Result<(), BridgeError>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理任务
pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    /// 单个任务的上限
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Box::new(task));
    }

    /// 返回成功完成的任务数
    pub async fn run_cleanup(&self) -> usize {
        let mut completed = 0;
        for task in &self.tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup '{}' done", name);
                    completed += 1;
                }
                Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", name, e),
                Err(_) => tracing::warn!("Cleanup '{}' timed out after {:?}", name, self.timeout),
            }
        }
        completed
    }
}

/// 向 broker 发送 DISCONNECT 并等待事件循环退出
pub struct BusDisconnect {
    transport: Arc<MqttTransport>,
}

impl BusDisconnect {
    pub fn new(transport: Arc<MqttTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for BusDisconnect {
    async fn cleanup(&self) -> Result<(), BridgeError> {
        self.transport.disconnect().await
    }

    fn name(&self) -> &'static str {
        "mqtt-disconnect"
    }
}

/// 运行 app 直到它自行结束或收到关闭信号；随后取消 token、执行清理，返回关闭原因
pub async fn run_with_graceful_shutdown<F, C, Fut>(
    manager: Arc<ShutdownManager>,
    app: F,
    cleanup: C,
) -> ShutdownReason
where
    F: Future<Output = ()>,
    C: FnOnce() -> Fut,
    Fut: Future<Output = usize>,
{
    manager.install_signal_handlers();
    let token = manager.token();

    tokio::select! {
        _ = app => manager.shutdown(ShutdownReason::BusClosed),
        _ = token.cancelled() => {}
    }

    let completed = cleanup().await;
    tracing::debug!("{} cleanup tasks completed", completed);
    manager.reason().unwrap_or(ShutdownReason::BusClosed)
}
