//! 挑战-应答握手
//!
//! 流程：challenge(username) -> {salt, nonce, alg} -> 按后端方案加密密码 -> 摘要 `username:密文:nonce`
//! -> login(username, hash) -> sid。
//! 密码加密与摘要算法因后端而异，通过 ChallengeScheme 策略注入；整个握手也可替换为其它 Handshake 实现。

use std::fmt;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{json, Value};

use super::RpcClient;
use crate::core::BridgeError;

/// 后端登录凭据（Debug 输出不含密码）
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 握手 trait：用凭据换取会话 token
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn authenticate(
        &self,
        rpc: &dyn RpcClient,
        credentials: &Credentials,
    ) -> Result<String, BridgeError>;
}

/// challenge 响应
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    pub salt: String,
    pub nonce: String,
    /// 设备可能返回数字（1 / 5 / 6）或字符串
    #[serde(default)]
    pub alg: Value,
}

impl Challenge {
    /// crypt 设置串中的算法标识，缺省为 MD5-crypt
    pub fn alg_tag(&self) -> String {
        match &self.alg {
            Value::String(s) => s.clone(),
            Value::Null => "1".to_string(),
            other => other.to_string(),
        }
    }
}

/// 后端相关的密码加密与摘要策略
pub trait ChallengeScheme: Send + Sync {
    fn cipher_password(&self, password: &str, challenge: &Challenge) -> Result<String, BridgeError>;

    fn digest(&self, input: &str) -> String;
}

/// 通用挑战-应答握手，算法由 S 决定
pub struct ChallengeHandshake<S> {
    scheme: S,
}

impl<S: ChallengeScheme> ChallengeHandshake<S> {
    pub fn new(scheme: S) -> Self {
        Self { scheme }
    }
}

#[async_trait]
impl<S: ChallengeScheme> Handshake for ChallengeHandshake<S> {
    async fn authenticate(
        &self,
        rpc: &dyn RpcClient,
        credentials: &Credentials,
    ) -> Result<String, BridgeError> {
        let username = credentials.username.as_str();

        let raw = rpc
            .call("challenge", json!({ "username": username }))
            .await
            .map_err(|e| BridgeError::Authentication(format!("challenge: {e}")))?;
        let challenge: Challenge = serde_json::from_value(raw)
            .map_err(|e| BridgeError::Authentication(format!("invalid challenge response: {e}")))?;

        let ciphered = self.scheme.cipher_password(credentials.password(), &challenge)?;
        let hash = self
            .scheme
            .digest(&format!("{}:{}:{}", username, ciphered, challenge.nonce));

        let login = rpc
            .call("login", json!({ "username": username, "hash": hash }))
            .await
            .map_err(|e| BridgeError::Authentication(format!("login: {e}")))?;

        login
            .get("sid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Authentication("login response has no sid".to_string()))
    }
}

/// GL.iNet 方案：Unix crypt（`$alg$salt$`）+ 十六进制 MD5
#[derive(Debug, Default, Clone, Copy)]
pub struct GlinetScheme;

impl ChallengeScheme for GlinetScheme {
    fn cipher_password(&self, password: &str, challenge: &Challenge) -> Result<String, BridgeError> {
        let setting = format!("${}${}$", challenge.alg_tag(), challenge.salt);
        pwhash::unix::crypt(password, &setting)
            .map_err(|e| BridgeError::Authentication(format!("password crypt failed: {e}")))
    }

    fn digest(&self, input: &str) -> String {
        hex::encode(Md5::digest(input.as_bytes()))
    }
}
