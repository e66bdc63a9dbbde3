//! Update 调度：每个 Update 独立定时器
//!
//! 首次连接时为每个 active Update 启动一个 tokio interval（首个 tick 立即触发，即连接后马上刷新一次），
//! 之后按各自周期触发，互不影响、无全局节拍。每次触发都在独立任务中执行，失败或 panic 只记日志，
//! 不会停掉自己的定时器，也不会影响其它 Update。
//! Action 声明的依赖 Update 通过 trigger 在周期之外立即重跑一次。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::registry::{RegisteredUpdate, Registry};
use crate::integrations::Publisher;

/// interval 不允许为 0
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// 触发来源
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TriggerKind {
    /// 周期定时器（含连接后的首次立即触发）
    Timer,
    /// Action 完成后的依赖重跑
    Dependent,
}

/// 单次执行结果
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Panicked,
}

/// 单次执行序号（仅用于日志关联）
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RunId(u64);

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(0);

impl RunId {
    fn next() -> Self {
        Self(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Update 调度器
pub struct Scheduler {
    registry: Arc<Registry>,
    publisher: Publisher,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>, publisher: Publisher) -> Self {
        Self {
            registry,
            publisher,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 为每个 Update 启动定时器，返回启动的定时器数；重复调用不会再启动（返回 0）
    pub fn start(&self, shutdown: CancellationToken) -> usize {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Scheduler already running, keeping existing timers");
            return 0;
        }

        let mut spawned = 0;
        for entry in self.registry.updates() {
            let entry = entry.clone();
            let publisher = self.publisher.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(entry.update.interval.max(MIN_INTERVAL));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            tokio::spawn(run_update(entry.clone(), publisher.clone(), TriggerKind::Timer));
                        }
                    }
                }
                tracing::debug!("Timer for update {} stopped", entry.update.id);
            });
            spawned += 1;
        }
        tracing::info!("Scheduler started {} update timers", spawned);
        spawned
    }

    /// 周期外立即执行一次；id 未注册时为空操作，返回 None
    pub async fn trigger(&self, id: &str) -> Option<RunOutcome> {
        match self.registry.update(id) {
            Some(entry) => Some(
                run_update(entry.clone(), self.publisher.clone(), TriggerKind::Dependent).await,
            ),
            None => {
                tracing::warn!("Dependent update {} is not registered, skipping", id);
                None
            }
        }
    }
}

/// 执行一次 Update，错误与 panic 都就地记录
async fn run_update(entry: RegisteredUpdate, publisher: Publisher, kind: TriggerKind) -> RunOutcome {
    let run = RunId::next();
    tracing::info!(
        ?run,
        ?kind,
        "Running update {} of {}",
        entry.update.id,
        entry.integration
    );
    let update = entry.update.clone();
    let result = AssertUnwindSafe(async move { update.run(publisher).await })
        .catch_unwind()
        .await;
    match result {
        Ok(Ok(())) => RunOutcome::Succeeded,
        Ok(Err(e)) => {
            tracing::error!(
                ?run,
                update = %entry.update.id,
                integration = %entry.integration,
                category = ?e.category(),
                "Update failed: {}",
                e
            );
            RunOutcome::Failed
        }
        Err(panic) => {
            tracing::error!(
                ?run,
                update = %entry.update.id,
                integration = %entry.integration,
                "Update panicked: {}",
                panic_message(panic.as_ref())
            );
            RunOutcome::Panicked
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::core::BridgeError;
    use crate::integrations::{Integration, StaticIntegration, Update};

    fn counting(id: &str, interval_ms: u64, counter: Arc<AtomicUsize>, fail: bool) -> Update {
        Update::new(id, interval_ms, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(BridgeError::Update("backend unreachable".into()))
                } else {
                    Ok(())
                }
            }
        })
    }

    fn scheduler(updates: Vec<Update>) -> Scheduler {
        let integration = updates
            .into_iter()
            .fold(StaticIntegration::new("test"), StaticIntegration::update);
        let registry = Registry::build(&[Arc::new(integration) as Arc<dyn Integration>]).unwrap();
        Scheduler::new(Arc::new(registry), Publisher::new(|_, _| {}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_fires_immediately_then_on_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(vec![counting("status", 60_000, count.clone(), false)]);

        assert_eq!(scheduler.start(CancellationToken::new()), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(59_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_update_keeps_firing_and_is_isolated() {
        let flaky = Arc::new(AtomicUsize::new(0));
        let steady = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(vec![
            counting("flaky", 1_000, flaky.clone(), true),
            counting("steady", 2_000, steady.clone(), false),
        ]);

        scheduler.start(CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(4_500)).await;

        // t = 0, 1, 2, 3, 4 秒
        assert_eq!(flaky.load(Ordering::SeqCst), 5);
        // t = 0, 2, 4 秒
        assert_eq!(steady.load(Ordering::SeqCst), 3);
    }

    fn explode() -> Result<(), BridgeError> {
        panic!("update blew up")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_update_does_not_stop_timer() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let update = Update::new("boom", 1_000, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                explode()
            }
        });
        let scheduler = scheduler(vec![update]);

        scheduler.start(CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert_eq!(scheduler.trigger("boom").await, Some(RunOutcome::Panicked));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(vec![counting("status", 60_000, count.clone(), false)]);

        assert_eq!(scheduler.start(CancellationToken::new()), 1);
        assert_eq!(scheduler.start(CancellationToken::new()), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timers() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(vec![counting("status", 1_000, count.clone(), false)]);
        let token = CancellationToken::new();

        scheduler.start(token.clone());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_trigger_runs_once_and_ignores_unknown_ids() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(vec![counting("wifi_status", 60_000, count.clone(), false)]);

        assert_eq!(scheduler.trigger("wifi_status").await, Some(RunOutcome::Succeeded));
        assert_eq!(scheduler.trigger("missing").await, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_started());
    }
}
