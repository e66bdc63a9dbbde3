//! 设备 RPC 抽象
//!
//! 所有后端（HTTP JSON-RPC / 测试用脚本客户端）实现 RpcClient：call(method, params) -> result。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// RPC 层错误：网络、远端错误对象、响应格式不合法
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),

    /// 远端返回的 JSON-RPC error 对象
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RpcError {
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// RPC 客户端 trait：一次调用，返回 result 字段
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}
