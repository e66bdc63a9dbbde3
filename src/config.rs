//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HOMEBUS__*` 覆盖（双下划线表示嵌套，如 `HOMEBUS__MQTT__HOST=mqtt://broker.lan`）。
//! 必填项（broker 地址与凭据、各后端地址与凭据）在这里只做反序列化，缺失时由使用方在启动阶段报 Config 错误。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::BridgeError;
use crate::rpc::DEFAULT_AUTH_INVALID_CODE;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttSection,
    pub glinet: GlinetSection,
}

/// [mqtt] 段：broker 地址、凭据与客户端参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// `mqtt://host[:port]` 或 `host[:port]`
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 未设置时为 homebus-<uuid>
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    /// rumqttc 请求通道容量
    pub channel_capacity: usize,
    /// 连接出错后再次 poll 前的等待（秒）
    pub reconnect_delay_secs: u64,
    /// 关闭时等待 DISCONNECT 写出的上限（秒）
    pub disconnect_timeout_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: None,
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 30,
            channel_capacity: 64,
            reconnect_delay_secs: 5,
            disconnect_timeout_secs: 5,
        }
    }
}

/// [glinet] 段：GL.iNet 路由器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlinetSection {
    pub enabled: bool,
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    /// 会话失效错误码
    pub auth_invalid_code: i64,
    pub wifi_interval_ms: u64,
    pub tailscale_interval_ms: u64,
}

impl Default for GlinetSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            username: None,
            password: None,
            request_timeout_secs: 10,
            auth_invalid_code: DEFAULT_AUTH_INVALID_CODE,
            wifi_interval_ms: 60_000,
            tailscale_interval_ms: 60_000,
        }
    }
}

/// 取必填项；缺失或为空白时返回 Config 错误
pub fn require(value: &Option<String>, key: &str) -> Result<String, BridgeError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(BridgeError::Config(format!("{key} is not configured"))),
    }
}

/// 取必填的密码类字段：只检查非空白，原值（含首尾空格）保持不变
pub fn require_secret(value: &Option<String>, key: &str) -> Result<String, BridgeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(BridgeError::Config(format!("{key} is not configured"))),
    }
}

/// 从 config 目录加载配置，环境变量 HOMEBUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HOMEBUS__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HOMEBUS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
