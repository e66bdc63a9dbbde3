//! JSON-RPC 2.0 over HTTP 客户端
//!
//! 所有请求 POST 到 `http://<host>/rpc`；响应中的 error 对象转为 RpcError::Remote，result 原样返回。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RpcClient, RpcError};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

/// HTTP JSON-RPC 客户端
pub struct HttpRpcClient {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(host: &str, timeout_secs: u64) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: rpc_endpoint(host),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RpcError::Transport(format!(
                "HTTP {} from {}",
                resp.status(),
                self.endpoint
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        parse_response(body)
    }
}

/// host 可带协议前缀；未带时默认 http
fn rpc_endpoint(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}/rpc")
    } else {
        format!("http://{host}/rpc")
    }
}

fn parse_response(body: Value) -> Result<Value, RpcError> {
    let resp: RpcResponse =
        serde_json::from_value(body).map_err(|e| RpcError::Malformed(e.to_string()))?;
    if let Some(err) = resp.error {
        return Err(RpcError::Remote {
            code: err.code,
            message: err.message,
        });
    }
    resp.result
        .ok_or_else(|| RpcError::Malformed("response has neither result nor error".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_defaults_to_http() {
        assert_eq!(rpc_endpoint("192.168.8.1"), "http://192.168.8.1/rpc");
        assert_eq!(rpc_endpoint("https://router.lan/"), "https://router.lan/rpc");
    }

    #[test]
    fn test_parse_result() {
        let body = json!({"jsonrpc": "2.0", "id": 0, "result": {"sid": "abc"}});
        assert_eq!(parse_response(body).unwrap(), json!({"sid": "abc"}));
    }

    #[test]
    fn test_parse_error_object() {
        let body = json!({"jsonrpc": "2.0", "id": 0, "error": {"code": -32000, "message": "Access denied"}});
        let err = parse_response(body).unwrap_err();
        assert_eq!(err.code(), Some(-32000));
    }

    #[test]
    fn test_parse_empty_response_is_malformed() {
        let err = parse_response(json!({"jsonrpc": "2.0", "id": 0})).unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }

    #[test]
    fn test_request_shape() {
        let req = RpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params: json!(["sid", "wifi", "get_config"]),
            id: 3,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["params"][1], "wifi");
        assert_eq!(v["id"], 3);
    }
}
