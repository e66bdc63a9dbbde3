//! 总线传输层
//!
//! 编排器只依赖 BusClient（subscribe / publish）与 BusEvent 事件流；
//! 连接、重连等细节留在具体实现内（MQTT 走 rumqttc 事件循环，测试走内存总线）。

pub mod memory;
pub mod mqtt;

use async_trait::async_trait;

use crate::core::BridgeError;

pub use memory::MemoryBus;
pub use mqtt::{parse_broker_address, MqttTransport};

/// 传输层推给编排器的事件
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// 已连上 broker（重连成功也会再次发出）
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected(String),
}

/// 总线客户端 trait：仅编排器调用 subscribe，publish 由 Publisher 闭包持有
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError>;

    /// 非阻塞投递，失败只影响这一条消息
    fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError>;
}
