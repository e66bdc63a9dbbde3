//! 后端集成：契约（Integration / Action / Update / Publisher）与具体设备实现

pub mod contract;
pub mod glinet;

use std::sync::Arc;

pub use contract::{
    Action, ActionFuture, Integration, Publisher, StaticIntegration, Update, UpdateFuture,
};
pub use glinet::GlinetIntegration;

use crate::config::AppConfig;
use crate::core::BridgeError;

/// 按配置安装全部已启用的集成；任何一个构造失败都会中止启动
pub fn install(cfg: &AppConfig) -> Result<Vec<Arc<dyn Integration>>, BridgeError> {
    let mut integrations: Vec<Arc<dyn Integration>> = Vec::new();

    if cfg.glinet.enabled {
        integrations.push(Arc::new(GlinetIntegration::from_config(&cfg.glinet)?));
    } else {
        tracing::info!("{} integration disabled by configuration", glinet::NAME);
    }

    for integration in &integrations {
        tracing::info!(
            "Installed integration {} v{}",
            integration.name(),
            integration.version()
        );
    }
    Ok(integrations)
}
