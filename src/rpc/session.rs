//! 会话管理：单个后端的认证状态机
//!
//! Unauthenticated -> Authenticating（握手进行中）-> Authenticated（token 已缓存）。
//! - 握手 single-flight：Authenticating 期间的并发调用共享同一个握手 future，而不是各自发起
//! - token 无本地过期时钟，仅在后端返回「认证失效」错误码时被动发现
//! - 每次外部调用最多重试一次：首次失效则丢弃 token、重新认证并重试；重试仍失效则返回 SessionRenewalFailed

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Credentials, Handshake, RpcClient};
use crate::core::BridgeError;

/// GL.iNet 等设备的「会话无效」错误码
pub const DEFAULT_AUTH_INVALID_CODE: i64 = -32000;

type HandshakeFlight = Shared<BoxFuture<'static, Result<String, BridgeError>>>;

enum SessionState {
    Unauthenticated,
    Authenticating {
        generation: u64,
        flight: HandshakeFlight,
    },
    Authenticated {
        token: String,
    },
}

/// 对外可见的会话阶段（日志与测试用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

struct Inner {
    state: SessionState,
    /// 每次发起握手递增，防止旧握手的结果覆盖新状态
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// 单个后端的会话管理器
pub struct SessionManager {
    backend: String,
    rpc: Arc<dyn RpcClient>,
    handshake: Arc<dyn Handshake>,
    credentials: Credentials,
    auth_invalid_code: i64,
    inner: Mutex<Inner>,
    handshakes: AtomicUsize,
}

impl SessionManager {
    pub fn new(
        backend: impl Into<String>,
        rpc: Arc<dyn RpcClient>,
        handshake: Arc<dyn Handshake>,
        credentials: Credentials,
    ) -> Self {
        Self {
            backend: backend.into(),
            rpc,
            handshake,
            credentials,
            auth_invalid_code: DEFAULT_AUTH_INVALID_CODE,
            inner: Mutex::new(Inner {
                state: SessionState::Unauthenticated,
                generation: 0,
            }),
            handshakes: AtomicUsize::new(0),
        }
    }

    /// 设置触发重新认证的错误码
    pub fn with_auth_invalid_code(mut self, code: i64) -> Self {
        self.auth_invalid_code = code;
        self
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub async fn phase(&self) -> SessionPhase {
        match self.inner.lock().await.state {
            SessionState::Unauthenticated => SessionPhase::Unauthenticated,
            SessionState::Authenticating { .. } => SessionPhase::Authenticating,
            SessionState::Authenticated { .. } => SessionPhase::Authenticated,
        }
    }

    /// 已发起的握手次数
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::Relaxed)
    }

    /// 带认证的调用：params 前自动插入 token，即 `[token, ..params]`
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BridgeError> {
        let mut attempt = Attempt::First;
        loop {
            let token = self.token().await?;

            let mut full = Vec::with_capacity(params.len() + 1);
            full.push(Value::String(token.clone()));
            full.extend(params.iter().cloned());

            match self.rpc.call(method, Value::Array(full)).await {
                Ok(result) => return Ok(result),
                Err(err) if err.code() == Some(self.auth_invalid_code) => match attempt {
                    Attempt::First => {
                        tracing::warn!(
                            backend = %self.backend,
                            method,
                            "Session rejected by backend, re-authenticating"
                        );
                        self.invalidate(&token).await;
                        attempt = Attempt::Retry;
                    }
                    Attempt::Retry => {
                        tracing::error!(
                            backend = %self.backend,
                            method,
                            "Session still rejected after renewal, giving up"
                        );
                        return Err(BridgeError::SessionRenewalFailed {
                            method: method.to_string(),
                        });
                    }
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// 取得有效 token：已缓存直接返回；握手进行中则加入；否则发起新握手
    async fn token(&self) -> Result<String, BridgeError> {
        let (generation, flight) = {
            let mut inner = self.inner.lock().await;
            let joined = match &inner.state {
                SessionState::Authenticated { token } => return Ok(token.clone()),
                SessionState::Authenticating { generation, flight } => {
                    Some((*generation, flight.clone()))
                }
                SessionState::Unauthenticated => None,
            };
            match joined {
                Some(joined) => joined,
                None => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let flight = self.start_handshake();
                    inner.state = SessionState::Authenticating {
                        generation,
                        flight: flight.clone(),
                    };
                    (generation, flight)
                }
            }
        };

        let result = flight.await;

        let mut inner = self.inner.lock().await;
        let current = matches!(
            &inner.state,
            SessionState::Authenticating { generation: g, .. } if *g == generation
        );
        if current {
            inner.state = match &result {
                Ok(token) => {
                    tracing::info!(backend = %self.backend, "New session established");
                    tracing::debug!(backend = %self.backend, token = %token, "Session token");
                    SessionState::Authenticated {
                        token: token.clone(),
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = %self.backend, "Handshake failed: {}", e);
                    SessionState::Unauthenticated
                }
            };
        }
        result
    }

    fn start_handshake(&self) -> HandshakeFlight {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = %self.backend, "Starting handshake");

        let rpc = Arc::clone(&self.rpc);
        let handshake = Arc::clone(&self.handshake);
        let credentials = self.credentials.clone();
        async move { handshake.authenticate(rpc.as_ref(), &credentials).await }
            .boxed()
            .shared()
    }

    /// 丢弃被拒绝的 token；若已被其它调用换新则不动
    async fn invalidate(&self, stale: &str) {
        let mut inner = self.inner.lock().await;
        if matches!(&inner.state, SessionState::Authenticated { token } if token == stale) {
            inner.state = SessionState::Unauthenticated;
        }
    }
}
