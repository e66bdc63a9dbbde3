//! 桥接错误类型与错误分类
//!
//! 分类决定传播策略：只有配置错误会终止启动，其余错误都在单条消息 / 单次 Update 内隔离并记录日志。

use thiserror::Error;

use crate::rpc::RpcError;

/// 桥接运行过程中可能出现的错误（配置、认证、RPC、总线、负载解析等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),

    /// 挑战 / 登录失败
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// 重新认证后请求仍被拒绝（每次外部调用最多重试一次）
    #[error("Session renewal failed: '{method}' was still rejected after re-authentication")]
    SessionRenewalFailed { method: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC transport error: {0}")]
    RpcTransport(String),

    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),

    #[error("Bus transport error: {0}")]
    Transport(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Update failed: {0}")]
    Update(String),
}

/// 错误大类（对应日志中的 category 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 启动期致命
    Configuration,
    Authentication,
    Transport,
    /// 单条消息 / 单次 Update 内隔离
    Dispatch,
}

impl BridgeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::Config(_) => ErrorCategory::Configuration,
            BridgeError::Authentication(_) | BridgeError::SessionRenewalFailed { .. } => {
                ErrorCategory::Authentication
            }
            BridgeError::Transport(_) | BridgeError::RpcTransport(_) => ErrorCategory::Transport,
            BridgeError::Rpc { .. }
            | BridgeError::MalformedResponse(_)
            | BridgeError::InvalidPayload(_)
            | BridgeError::Update(_) => ErrorCategory::Dispatch,
        }
    }

    /// 是否应中止启动
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Transport(msg) => BridgeError::RpcTransport(msg),
            RpcError::Remote { code, message } => BridgeError::Rpc { code, message },
            RpcError::Malformed(msg) => BridgeError::MalformedResponse(msg),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidPayload(err.to_string())
    }
}
