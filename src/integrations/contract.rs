//! 集成契约：每个后端实现一次 Integration，声明 Actions（入站命令）与 Updates（周期状态刷新）
//!
//! 回调统一为「函数值」：Action 收到原始 payload，Update 在调用时拿到 Publisher，
//! 二者都不持有总线连接本身。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::BridgeError;

pub type ActionFuture = BoxFuture<'static, Result<Value, BridgeError>>;
pub type UpdateFuture = BoxFuture<'static, Result<(), BridgeError>>;

type ActionCallback = Arc<dyn Fn(Option<String>) -> ActionFuture + Send + Sync>;
type UpdateCallback = Arc<dyn Fn(Publisher) -> UpdateFuture + Send + Sync>;

/// 发布能力：闭包持有总线连接，调用方只拿到这个函数值
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<dyn Fn(&str, String) + Send + Sync>,
}

impl Publisher {
    pub fn new<F>(publish: F) -> Self
    where
        F: Fn(&str, String) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(publish),
        }
    }

    pub fn publish(&self, topic: &str, payload: impl Into<String>) {
        (self.inner)(topic, payload.into())
    }

    pub fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<(), BridgeError> {
        let payload = serde_json::to_string(value)?;
        self.publish(topic, payload);
        Ok(())
    }

    /// 状态约定：`<base>/status` 发 `{"state": ..}`，`<base>/attributes` 发完整快照
    pub fn publish_state<T: Serialize + ?Sized>(
        &self,
        base_topic: &str,
        state: &str,
        attributes: &T,
    ) -> Result<(), BridgeError> {
        self.publish_json(&format!("{base_topic}/status"), &json!({ "state": state }))?;
        self.publish_json(&format!("{base_topic}/attributes"), attributes)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Publisher")
    }
}

/// 入站命令：topic 上收到消息时调用 callback
#[derive(Clone)]
pub struct Action {
    pub topic: String,
    callback: ActionCallback,
    /// callback 结束后立即重跑的 Update id
    pub dependent_updates: Vec<String>,
    /// false 表示已声明但不订阅
    pub active: bool,
}

impl Action {
    pub fn new<F, Fut>(topic: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BridgeError>> + Send + 'static,
    {
        Self {
            topic: topic.into(),
            callback: Arc::new(move |payload| callback(payload).boxed()),
            dependent_updates: Vec::new(),
            active: true,
        }
    }

    pub fn with_dependents<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependent_updates = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn invoke(&self, payload: Option<String>) -> ActionFuture {
        (self.callback)(payload)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("topic", &self.topic)
            .field("dependent_updates", &self.dependent_updates)
            .field("active", &self.active)
            .finish()
    }
}

/// 出站周期任务：按 interval 读取后端状态并发布
#[derive(Clone)]
pub struct Update {
    pub id: String,
    pub description: String,
    pub interval: Duration,
    callback: UpdateCallback,
    pub active: bool,
}

impl Update {
    pub fn new<F, Fut>(id: impl Into<String>, interval_ms: u64, run: F) -> Self
    where
        F: Fn(Publisher) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: String::new(),
            interval: Duration::from_millis(interval_ms),
            callback: Arc::new(move |publisher| run(publisher).boxed()),
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn run(&self, publisher: Publisher) -> UpdateFuture {
        (self.callback)(publisher)
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("active", &self.active)
            .finish()
    }
}

/// 后端集成 trait：名称、版本、Actions、Updates
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn actions(&self) -> Vec<Action>;

    fn updates(&self) -> Vec<Update>;
}

/// 由现成 Actions / Updates 组装的集成（脚本化设备、测试夹具）
#[derive(Debug, Clone)]
pub struct StaticIntegration {
    name: String,
    version: String,
    actions: Vec<Action>,
    updates: Vec<Update>,
}

impl StaticIntegration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.0.0".to_string(),
            actions: Vec::new(),
            updates: Vec::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn update(mut self, update: Update) -> Self {
        self.updates.push(update);
        self
    }
}

impl Integration for StaticIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn actions(&self) -> Vec<Action> {
        self.actions.clone()
    }

    fn updates(&self) -> Vec<Update> {
        self.updates.clone()
    }
}
