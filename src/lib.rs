//! Homebus - MQTT 与家用设备 JSON-RPC 之间的桥接服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、Topic / Update 注册表、Update 调度、主控编排、优雅关闭
//! - **integrations**: 后端集成契约（Action / Update / Publisher）与 GL.iNet 路由器集成
//! - **observability**: tracing 日志初始化
//! - **rpc**: JSON-RPC 客户端、挑战-应答握手与会话管理（单飞握手、失效后重试一次）
//! - **transport**: 消息总线抽象（MQTT / 内存总线）

pub mod config;
pub mod core;
pub mod integrations;
pub mod observability;
pub mod rpc;
pub mod transport;
