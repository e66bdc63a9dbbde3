//! MQTT 传输（rumqttc）
//!
//! 后台任务持续 poll rumqttc 事件循环：ConnAck -> Connected，Publish -> Message，错误 -> Disconnected。
//! 重连由事件循环在下一次 poll 时自行完成，这里只在出错后等待 reconnect_delay_secs。
//! 事件循环不跟随应用的关闭 token：它要活到 disconnect 把 DISCONNECT 报文真正写出去为止。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BusClient, BusEvent};
use crate::config::{require, require_secret, MqttSection};
use crate::core::BridgeError;

const DEFAULT_PORT: u16 = 1883;

/// rumqttc 要求 keep alive 不低于 5 秒
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// MQTT 总线客户端
pub struct MqttTransport {
    client: AsyncClient,
    /// disconnect 已发出：之后的连接错误与重连等待都直接结束事件循环
    closing: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// 按 [mqtt] 配置创建客户端并启动事件循环；返回客户端与事件接收端
    ///
    /// host / username / password 缺失时返回 Config 错误。
    pub fn connect(
        section: &MqttSection,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<BusEvent>), BridgeError> {
        let address = require(&section.host, "mqtt.host")?;
        let username = require(&section.username, "mqtt.username")?;
        let password = require_secret(&section.password, "mqtt.password")?;
        let (host, port) = parse_broker_address(&address)?;

        let client_id = section
            .client_id
            .clone()
            .unwrap_or_else(|| format!("homebus-{}", uuid::Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_credentials(username, password);
        options.set_keep_alive(Duration::from_secs(
            section.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));

        let (client, mut eventloop) = AsyncClient::new(options, section.channel_capacity.max(1));
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = format!("{host}:{port}");
        let reconnect_delay = Duration::from_secs(section.reconnect_delay_secs);
        let closing = CancellationToken::new();

        let loop_closing = closing.clone();
        let label = broker.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker {}", label);
                        BusEvent::Connected
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => BusEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    },
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        tracing::info!("Disconnected from MQTT broker {}", label);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) if loop_closing.is_cancelled() => {
                        tracing::debug!("MQTT connection closed during disconnect ({}): {}", label, e);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("MQTT client error ({}): {}", label, e);
                        let _ = tx.send(BusEvent::Disconnected(e.to_string()));
                        tokio::select! {
                            _ = loop_closing.cancelled() => break,
                            _ = tokio::time::sleep(reconnect_delay) => continue,
                        }
                    }
                };
                // 编排循环退出后接收端已关闭；事件循环仍需继续 poll 以完成 disconnect
                if tx.send(event).is_err() {
                    tracing::debug!("Bus event dropped, no consumer for {}", label);
                }
            }
            tracing::debug!("MQTT event loop for {} stopped", label);
        });

        tracing::info!("Connecting to MQTT broker {}", broker);
        let transport = Self {
            client,
            closing,
            event_loop: Mutex::new(Some(handle)),
        };
        Ok((Arc::new(transport), rx))
    }

    /// 发送 DISCONNECT 并等待事件循环把它写出后退出
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        let Some(handle) = self.event_loop.lock().await.take() else {
            return Ok(());
        };
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        // 已断开（等待重连中）时没有可写的连接，直接结束
        self.closing.cancel();
        handle
            .await
            .map_err(|e| BridgeError::Transport(format!("MQTT event loop: {e}")))
    }
}

#[async_trait]
impl BusClient for MqttTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Transport(format!("subscribe {topic}: {e}")))
    }

    fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BridgeError::Transport(format!("publish {topic}: {e}")))
    }
}

/// 解析 `mqtt://host[:port]`、`tcp://host[:port]` 或 `host[:port]`
pub fn parse_broker_address(address: &str) -> Result<(String, u16), BridgeError> {
    let trimmed = address.trim().trim_end_matches('/');
    let rest = match trimmed.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(BridgeError::Config(format!(
                "unsupported MQTT scheme '{scheme}' in {address}"
            )))
        }
        None => trimmed,
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BridgeError::Config(format!("invalid MQTT port in {address}")))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(BridgeError::Config(format!("missing MQTT host in {address}")));
    }
    Ok((host.to_string(), port))
}
