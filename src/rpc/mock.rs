//! 脚本化 RPC 客户端（用于测试，无需真实设备）
//!
//! 由闭包按 (method, params, 该 method 的第几次调用) 决定响应；记录全部调用，可选模拟网络延迟。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RpcClient, RpcError};

type Responder = Box<dyn Fn(&str, &Value, usize) -> Result<Value, RpcError> + Send + Sync>;

/// 脚本客户端：响应由 responder 闭包给出
pub struct ScriptedRpcClient {
    responder: Responder,
    latency: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl ScriptedRpcClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value, usize) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: None,
            calls: Mutex::new(Vec::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// 每次调用前 sleep，用于制造挂起点
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 某 method 被调用的次数
    pub fn count(&self, method: &str) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// 全部调用记录 (method, params)
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RpcClient for ScriptedRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let nth = {
            let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            let n = counts.entry(method.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((method.to_string(), params.clone()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.responder)(method, &params, nth)
    }
}
