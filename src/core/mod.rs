//! 核心编排层：错误分类、注册表、Update 调度、主控循环、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod shutdown;

pub use error::{BridgeError, ErrorCategory};
pub use orchestrator::{DispatchOutcome, Orchestrator};
pub use registry::{RegisteredAction, RegisteredUpdate, Registry};
pub use scheduler::{RunOutcome, Scheduler, TriggerKind};
pub use shutdown::{
    run_with_graceful_shutdown, BusDisconnect, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
