//! 主题 / Update 注册表
//!
//! 启动时由全部已安装集成一次性构建，之后只读：
//! - TopicRegistry：topic -> (Action, 所属集成)
//! - UpdateRegistry：update id -> (Update, 所属集成)
//!
//! 同名 topic / id 后注册者覆盖先注册者，只记一条 warn 日志；这是配置隐患而非保证。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::BridgeError;
use crate::integrations::{Action, Integration, Update};

/// 已注册的 Action 及其所属集成名
#[derive(Debug, Clone)]
pub struct RegisteredAction {
    pub action: Action,
    pub integration: String,
}

/// 已注册的 Update 及其所属集成名
#[derive(Debug, Clone)]
pub struct RegisteredUpdate {
    pub update: Update,
    pub integration: String,
}

/// 进程唯一的注册表，按 Arc 传给编排器与调度器
#[derive(Debug, Default)]
pub struct Registry {
    topics: HashMap<String, RegisteredAction>,
    updates: HashMap<String, RegisteredUpdate>,
}

impl Registry {
    /// 按集成顺序展平 Actions / Updates；没有任何集成时返回 Config 错误
    pub fn build(integrations: &[Arc<dyn Integration>]) -> Result<Self, BridgeError> {
        if integrations.is_empty() {
            return Err(BridgeError::Config("no integrations installed".to_string()));
        }

        let mut registry = Self::default();
        for integration in integrations {
            let name = integration.name().to_string();

            for action in integration.actions() {
                if !action.active {
                    tracing::info!("{}: topic {} is disabled, not subscribing", name, action.topic);
                    continue;
                }
                tracing::info!("{}: registering topic {}", name, action.topic);
                registry.insert_action(&name, action);
            }

            let updates = integration.updates();
            if updates.is_empty() {
                tracing::info!("{}: no updates to register", name);
            }
            for update in updates {
                if !update.active {
                    tracing::info!("{}: update {} is disabled", name, update.id);
                    continue;
                }
                tracing::info!(
                    "{}: registering update {} every {:?}",
                    name,
                    update.id,
                    update.interval
                );
                registry.insert_update(&name, update);
            }
        }
        Ok(registry)
    }

    fn insert_action(&mut self, integration: &str, action: Action) {
        let topic = action.topic.clone();
        let entry = RegisteredAction {
            action,
            integration: integration.to_string(),
        };
        if let Some(previous) = self.topics.insert(topic.clone(), entry) {
            tracing::warn!(
                "Topic {} from {} overwritten by {}",
                topic,
                previous.integration,
                integration
            );
        }
    }

    fn insert_update(&mut self, integration: &str, update: Update) {
        let id = update.id.clone();
        let entry = RegisteredUpdate {
            update,
            integration: integration.to_string(),
        };
        if let Some(previous) = self.updates.insert(id.clone(), entry) {
            tracing::warn!(
                "Update {} from {} overwritten by {}",
                id,
                previous.integration,
                integration
            );
        }
    }

    pub fn action(&self, topic: &str) -> Option<&RegisteredAction> {
        self.topics.get(topic)
    }

    pub fn update(&self, id: &str) -> Option<&RegisteredUpdate> {
        self.updates.get(id)
    }

    /// 需要订阅的全部 topic（已排序，便于日志与测试）
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn updates(&self) -> impl Iterator<Item = &RegisteredUpdate> {
        self.updates.values()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn update_count(&self) -> usize {
        self.updates.len()
    }
}
