//! 内存总线（用于测试与本地演示，无需 broker）
//!
//! 记录所有 subscribe / publish；inject 可模拟 broker 下发的事件。

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BusClient, BusEvent};
use crate::core::BridgeError;

/// 内存总线：订阅与发布都只记录
pub struct MemoryBus {
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, String)>>,
    events: mpsc::UnboundedSender<BusEvent>,
}

impl MemoryBus {
    /// 返回总线与对应的事件接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                subscriptions: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                events,
            },
            rx,
        )
    }

    /// 模拟 broker 事件
    pub fn inject(&self, event: BusEvent) {
        let _ = self.events.send(event);
    }

    /// 模拟一条入站消息
    pub fn deliver(&self, topic: &str, payload: &str) {
        self.inject(BusEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 某 topic 上最近一次发布的内容
    pub fn last_published(&self, topic: &str) -> Option<String> {
        self.published()
            .into_iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), payload));
        Ok(())
    }
}
