//! GL.iNet 路由器集成
//!
//! 通过 `/rpc` 的 JSON-RPC 接口操作路由器：
//! - Actions：`home/glinet/<module>/<verb>` 直接映射为 `call [sid, module, verb, payload?]`；
//!   `home/glinet/wifi/set_enable` 接收 iface 配置数组，逐个调用 `wifi set_config`
//! - Updates：`wifi_status`（2.4G / 5G 两个接口）、`tailscale_status`，
//!   各自发布到 `<base>/status` 与 `<base>/attributes`

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Action, Integration, Publisher, Update};
use crate::config::{require, require_secret, GlinetSection};
use crate::core::BridgeError;
use crate::rpc::{ChallengeHandshake, Credentials, GlinetScheme, HttpRpcClient, SessionManager};

pub const NAME: &str = "GLiNet";
pub const VERSION: &str = "1.0.0";

pub const WIFI_STATUS: &str = "wifi_status";
pub const TAILSCALE_STATUS: &str = "tailscale_status";

const TOPIC_PREFIX: &str = "home/glinet";

/// 需要上报的无线接口：(radio 设备, iface 名, 发布的资源名)
const WIFI_BANDS: [(&str, &str, &str); 2] = [
    ("radio0", "default_radio0", "wifi_2g"),
    ("radio1", "default_radio1", "wifi_5g"),
];

/// GL.iNet 集成：持有自己的会话管理器
pub struct GlinetIntegration {
    session: Arc<SessionManager>,
    wifi_interval_ms: u64,
    tailscale_interval_ms: u64,
}

impl GlinetIntegration {
    /// 从 [glinet] 配置构造；host / username / password 任一缺失即返回 Config 错误
    pub fn from_config(section: &GlinetSection) -> Result<Self, BridgeError> {
        let host = require(&section.host, "glinet.host")?;
        let username = require(&section.username, "glinet.username")?;
        let password = require_secret(&section.password, "glinet.password")?;

        let rpc = HttpRpcClient::new(&host, section.request_timeout_secs)
            .map_err(|e| BridgeError::Config(format!("glinet rpc client: {e}")))?;
        tracing::info!("{}: RPC endpoint {}", NAME, rpc.endpoint());

        let session = SessionManager::new(
            NAME,
            Arc::new(rpc),
            Arc::new(ChallengeHandshake::new(GlinetScheme)),
            Credentials::new(username, password),
        )
        .with_auth_invalid_code(section.auth_invalid_code);

        Ok(Self::with_session(Arc::new(session))
            .with_intervals(section.wifi_interval_ms, section.tailscale_interval_ms))
    }

    /// 使用现成的会话（测试或自定义 RPC 客户端）
    pub fn with_session(session: Arc<SessionManager>) -> Self {
        let defaults = GlinetSection::default();
        Self {
            session,
            wifi_interval_ms: defaults.wifi_interval_ms,
            tailscale_interval_ms: defaults.tailscale_interval_ms,
        }
    }

    pub fn with_intervals(mut self, wifi_ms: u64, tailscale_ms: u64) -> Self {
        self.wifi_interval_ms = wifi_ms;
        self.tailscale_interval_ms = tailscale_ms;
        self
    }

    /// `home/glinet/<module>/<verb>` -> `call [sid, module, verb, payload?]`
    fn rpc_action(&self, module: &str, verb: &str) -> Action {
        let session = Arc::clone(&self.session);
        let (module, verb) = (module.to_string(), verb.to_string());
        Action::new(format!("{TOPIC_PREFIX}/{module}/{verb}"), move |payload| {
            let session = Arc::clone(&session);
            let mut params = vec![json!(module), json!(verb)];
            async move {
                if let Some(payload) = payload {
                    params.push(serde_json::from_str(&payload)?);
                }
                session.call("call", params).await
            }
        })
    }

    fn set_enable_action(&self) -> Action {
        let session = Arc::clone(&self.session);
        Action::new(format!("{TOPIC_PREFIX}/wifi/set_enable"), move |payload| {
            let session = Arc::clone(&session);
            async move {
                let Some(payload) = payload else {
                    return Ok(Value::Array(Vec::new()));
                };
                let ifaces: Vec<Value> = serde_json::from_str(&payload)?;
                let calls = ifaces.into_iter().map(|iface| {
                    let session = Arc::clone(&session);
                    async move {
                        session
                            .call("call", vec![json!("wifi"), json!("set_config"), iface])
                            .await
                    }
                });
                Ok(Value::Array(try_join_all(calls).await?))
            }
        })
        .with_dependents([WIFI_STATUS])
    }
}

impl Integration for GlinetIntegration {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn actions(&self) -> Vec<Action> {
        vec![
            self.set_enable_action(),
            self.rpc_action("system", "get_status"),
            self.rpc_action("tailscale", "get_status"),
            self.rpc_action("tailscale", "set_config")
                .with_dependents([TAILSCALE_STATUS]),
            self.rpc_action("wifi", "get_status"),
            self.rpc_action("wifi", "get_config"),
            self.rpc_action("wifi", "set_config").with_dependents([WIFI_STATUS]),
        ]
    }

    fn updates(&self) -> Vec<Update> {
        let wifi_session = Arc::clone(&self.session);
        let tailscale_session = Arc::clone(&self.session);
        vec![
            Update::new(WIFI_STATUS, self.wifi_interval_ms, move |publisher| {
                let session = Arc::clone(&wifi_session);
                async move { publish_wifi_status(&session, &publisher).await }
            })
            .with_description("2.4G / 5G wireless interface state"),
            Update::new(TAILSCALE_STATUS, self.tailscale_interval_ms, move |publisher| {
                let session = Arc::clone(&tailscale_session);
                async move { publish_tailscale_status(&session, &publisher).await }
            })
            .with_description("Tailscale VPN state"),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct WifiConfig {
    #[serde(default)]
    res: Vec<WifiDevice>,
}

#[derive(Debug, Deserialize)]
struct WifiDevice {
    device: String,
    #[serde(default)]
    ifaces: Vec<WifiIface>,
}

#[derive(Debug, Deserialize)]
struct WifiIface {
    name: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    ssid: Value,
    #[serde(default)]
    encryption: Value,
    #[serde(default)]
    guest: Value,
    #[serde(default)]
    hidden: Value,
}

#[derive(Debug, Serialize)]
struct WifiState<'a> {
    state: &'static str,
    ssid: &'a Value,
    encryption: &'a Value,
    guest: &'a Value,
    hidden: &'a Value,
}

#[derive(Debug, Deserialize)]
struct TailscaleConfig {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    lan_ip: Value,
    #[serde(default)]
    wan_enabled: Value,
    #[serde(default)]
    lan_enabled: Value,
}

#[derive(Debug, Serialize)]
struct TailscaleState<'a> {
    state: &'static str,
    enabled: bool,
    lan_ip: &'a Value,
    wan_enabled: &'a Value,
    lan_enabled: &'a Value,
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

async fn publish_wifi_status(session: &SessionManager, publisher: &Publisher) -> Result<(), BridgeError> {
    let raw = session
        .call("call", vec![json!("wifi"), json!("get_config")])
        .await?;
    let config: WifiConfig = serde_json::from_value(raw)
        .map_err(|e| BridgeError::MalformedResponse(format!("wifi get_config: {e}")))?;

    for (device, iface_name, resource) in WIFI_BANDS {
        let iface = config
            .res
            .iter()
            .find(|d| d.device == device)
            .and_then(|d| d.ifaces.iter().find(|i| i.name == iface_name))
            .ok_or_else(|| {
                BridgeError::MalformedResponse(format!("{device}/{iface_name} not found in wifi config"))
            })?;

        let state = WifiState {
            state: on_off(iface.enabled),
            ssid: &iface.ssid,
            encryption: &iface.encryption,
            guest: &iface.guest,
            hidden: &iface.hidden,
        };
        publisher.publish_state(&format!("{TOPIC_PREFIX}/{resource}"), state.state, &state)?;
        tracing::debug!("{}/{}/attributes {}", TOPIC_PREFIX, resource, json!(state));
    }

    tracing::info!("Wi-Fi status updated and published");
    Ok(())
}

async fn publish_tailscale_status(
    session: &SessionManager,
    publisher: &Publisher,
) -> Result<(), BridgeError> {
    let raw = session
        .call("call", vec![json!("tailscale"), json!("get_config")])
        .await?;
    let config: TailscaleConfig = serde_json::from_value(raw)
        .map_err(|e| BridgeError::MalformedResponse(format!("tailscale get_config: {e}")))?;

    let state = TailscaleState {
        state: on_off(config.enabled),
        enabled: config.enabled,
        lan_ip: &config.lan_ip,
        wan_enabled: &config.wan_enabled,
        lan_enabled: &config.lan_enabled,
    };
    publisher.publish_state(&format!("{TOPIC_PREFIX}/tailscale"), state.state, &state)?;

    tracing::info!("Tailscale status updated and published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::rpc::{RpcError, ScriptedRpcClient};

    fn router() -> Arc<ScriptedRpcClient> {
        Arc::new(ScriptedRpcClient::new(|method, params, _| match method {
            "challenge" => Ok(json!({"salt": "abcdefgh", "nonce": "n", "alg": 1})),
            "login" => Ok(json!({"sid": "sid"})),
            "call" => match (params[1].as_str(), params[2].as_str()) {
                (Some("wifi"), Some("get_config")) => Ok(json!({
                    "res": [
                        {"device": "radio0", "ifaces": [
                            {"name": "default_radio0", "enabled": true, "ssid": "home", "encryption": "psk2", "guest": false, "hidden": false},
                            {"name": "guest2g", "enabled": false, "ssid": "guest"}
                        ]},
                        {"device": "radio1", "ifaces": [
                            {"name": "default_radio1", "enabled": false, "ssid": "home-5g", "encryption": "sae", "guest": false, "hidden": true}
                        ]}
                    ]
                })),
                (Some("tailscale"), Some("get_config")) => Ok(json!({
                    "enabled": true, "lan_ip": "192.168.8.1", "wan_enabled": false, "lan_enabled": true
                })),
                _ => Ok(json!({})),
            },
            other => Err(RpcError::Remote { code: -32601, message: other.to_string() }),
        }))
    }

    fn integration(rpc: Arc<ScriptedRpcClient>) -> GlinetIntegration {
        let session = SessionManager::new(
            NAME,
            rpc,
            Arc::new(ChallengeHandshake::new(GlinetScheme)),
            Credentials::new("root", "secret"),
        );
        GlinetIntegration::with_session(Arc::new(session))
    }

    fn recording() -> (Publisher, Arc<Mutex<Vec<(String, Value)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let publisher = Publisher::new(move |topic, payload| {
            let value = serde_json::from_str(&payload).unwrap();
            sink.lock().unwrap().push((topic.to_string(), value));
        });
        (publisher, sent)
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let section = GlinetSection {
            host: Some("192.168.8.1".into()),
            username: Some("root".into()),
            password: None,
            ..GlinetSection::default()
        };
        let err = GlinetIntegration::from_config(&section).err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("glinet.password"));
    }

    #[test]
    fn test_from_config_applies_intervals() {
        let section = GlinetSection {
            host: Some("192.168.8.1".into()),
            username: Some("root".into()),
            password: Some("secret".into()),
            wifi_interval_ms: 5_000,
            ..GlinetSection::default()
        };
        let integration = GlinetIntegration::from_config(&section).unwrap();
        let updates = integration.updates();
        assert_eq!(updates[0].interval.as_millis(), 5_000);
        assert_eq!(updates[1].interval.as_millis(), 60_000);
    }

    #[test]
    fn test_declared_topics_and_dependents() {
        let integration = integration(router());
        let actions = integration.actions();
        let topics: Vec<&str> = actions.iter().map(|a| a.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "home/glinet/wifi/set_enable",
                "home/glinet/system/get_status",
                "home/glinet/tailscale/get_status",
                "home/glinet/tailscale/set_config",
                "home/glinet/wifi/get_status",
                "home/glinet/wifi/get_config",
                "home/glinet/wifi/set_config",
            ]
        );
        assert!(actions.iter().all(|a| a.active));
        assert_eq!(actions[3].dependent_updates, vec![TAILSCALE_STATUS.to_string()]);
        assert_eq!(actions[6].dependent_updates, vec![WIFI_STATUS.to_string()]);
    }

    #[tokio::test]
    async fn test_rpc_action_appends_json_payload() {
        let rpc = router();
        let integration = integration(rpc.clone());
        let action = integration.rpc_action("wifi", "set_config");

        action
            .invoke(Some(r#"{"iface":"default_radio0","enabled":false}"#.into()))
            .await
            .unwrap();
        let (_, params) = rpc.calls().into_iter().find(|(m, _)| m == "call").unwrap();
        assert_eq!(
            params,
            json!(["sid", "wifi", "set_config", {"iface": "default_radio0", "enabled": false}])
        );
    }

    #[tokio::test]
    async fn test_rpc_action_rejects_malformed_payload() {
        let rpc = router();
        let action = integration(rpc.clone()).rpc_action("wifi", "set_config");
        let err = action.invoke(Some("{not json".into())).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPayload(_)));
        assert_eq!(rpc.count("call"), 0);
    }

    #[tokio::test]
    async fn test_set_enable_calls_once_per_iface() {
        let rpc = router();
        let action = integration(rpc.clone()).set_enable_action();

        let out = action
            .invoke(Some(
                r#"[{"iface":"default_radio0","enabled":true},{"iface":"default_radio1","enabled":false}]"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(out.as_array().map(Vec::len), Some(2));
        assert_eq!(rpc.count("call"), 2);
        assert_eq!(rpc.count("login"), 1);
    }

    #[tokio::test]
    async fn test_set_enable_without_payload_is_noop() {
        let rpc = router();
        let out = integration(rpc.clone()).set_enable_action().invoke(None).await.unwrap();
        assert_eq!(out, json!([]));
        assert_eq!(rpc.count("challenge"), 0);
    }

    #[tokio::test]
    async fn test_wifi_status_publishes_both_bands() {
        let integration = integration(router());
        let (publisher, sent) = recording();
        let update = integration
            .updates()
            .into_iter()
            .find(|u| u.id == WIFI_STATUS)
            .unwrap();
        update.run(publisher).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], ("home/glinet/wifi_2g/status".to_string(), json!({"state": "ON"})));
        assert_eq!(sent[1].0, "home/glinet/wifi_2g/attributes");
        assert_eq!(sent[1].1["ssid"], "home");
        assert_eq!(sent[2], ("home/glinet/wifi_5g/status".to_string(), json!({"state": "OFF"})));
        assert_eq!(sent[3].1["hidden"], true);
    }

    #[tokio::test]
    async fn test_tailscale_status_publishes_snapshot() {
        let integration = integration(router());
        let (publisher, sent) = recording();
        let update = integration
            .updates()
            .into_iter()
            .find(|u| u.id == TAILSCALE_STATUS)
            .unwrap();
        update.run(publisher).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], ("home/glinet/tailscale/status".to_string(), json!({"state": "ON"})));
        assert_eq!(
            sent[1].1,
            json!({"state": "ON", "enabled": true, "lan_ip": "192.168.8.1", "wan_enabled": false, "lan_enabled": true})
        );
    }

    #[tokio::test]
    async fn test_wifi_status_missing_iface_is_error() {
        let rpc = Arc::new(ScriptedRpcClient::new(|method, _, _| match method {
            "challenge" => Ok(json!({"salt": "abcdefgh", "nonce": "n", "alg": 1})),
            "login" => Ok(json!({"sid": "sid"})),
            _ => Ok(json!({"res": [{"device": "radio0", "ifaces": []}]})),
        }));
        let (publisher, sent) = recording();
        let err = publish_wifi_status(&integration(rpc).session, &publisher)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedResponse(_)));
        assert!(sent.lock().unwrap().is_empty());
    }
}
