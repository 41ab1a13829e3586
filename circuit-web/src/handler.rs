//! 处理器描述符
//!
//! 描述符把路由目标和该路由自己的中间件栈绑在一起。
//! 目标要么是注册名形式的 `Class@method`，要么是进程内的可调用对象。
//! 只有全部由名称组成的描述符才能进入路由表快照

use crate::binder::BoundArgs;
use crate::constants::{CALLABLE_METHOD_NAME, DEFAULT_CONTROLLER_METHOD};
use crate::exception::SnapshotError;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::HandlerOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 可调用处理器
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: &mut Request, args: BoundArgs) -> anyhow::Result<HandlerOutput>;
}

/// 同步闭包处理器
struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Request, BoundArgs) -> anyhow::Result<HandlerOutput> + Send + Sync,
{
    async fn call(&self, request: &mut Request, args: BoundArgs) -> anyhow::Result<HandlerOutput> {
        (self.0)(request, args)
    }
}

/// 带名称和参数表的可调用处理器
#[derive(Clone)]
pub struct CallableHandler {
    name: String,
    params: Vec<String>,
    handler: Arc<dyn Handler>,
}

impl CallableHandler {
    pub fn new<H: Handler + 'static>(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// 从同步闭包创建
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Request, BoundArgs) -> anyhow::Result<HandlerOutput> + Send + Sync + 'static,
    {
        Self::new(name, FnHandler(func))
    }

    /// 声明参数名，匹配到的路径参数按名称绑定
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for CallableHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableHandler")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// 中间件栈中的一项：注册名或现成的实例
#[derive(Clone)]
pub enum MiddlewareRef {
    Named(String),
    Instance(Arc<dyn Middleware>),
}

impl MiddlewareRef {
    pub fn instance<M: Middleware + 'static>(middleware: M) -> Self {
        MiddlewareRef::Instance(Arc::new(middleware))
    }

    /// 日志和上下文标签里使用的名称
    pub fn label(&self) -> String {
        match self {
            MiddlewareRef::Named(name) => name.clone(),
            MiddlewareRef::Instance(middleware) => middleware.name().to_string(),
        }
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            MiddlewareRef::Instance(middleware) => {
                f.debug_tuple("Instance").field(&middleware.name()).finish()
            }
        }
    }
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        MiddlewareRef::Named(name.to_string())
    }
}

impl From<String> for MiddlewareRef {
    fn from(name: String) -> Self {
        MiddlewareRef::Named(name)
    }
}

impl From<Arc<dyn Middleware>> for MiddlewareRef {
    fn from(middleware: Arc<dyn Middleware>) -> Self {
        MiddlewareRef::Instance(middleware)
    }
}

/// 路由目标
#[derive(Debug, Clone)]
pub enum HandlerTarget {
    Callable(CallableHandler),
    ClassMethod { class: String, method: String },
}

impl HandlerTarget {
    /// 解析 `Class@method`
    ///
    /// 类名两端的空白、NUL、反斜杠和 `::` 会被去掉，方法名缺省为 `index`
    pub fn parse(target: &str) -> Self {
        let (class, method) = match target.split_once('@') {
            Some((class, method)) => (class, method.trim()),
            None => (target, ""),
        };

        let method = if method.is_empty() {
            DEFAULT_CONTROLLER_METHOD
        } else {
            method
        };

        HandlerTarget::ClassMethod {
            class: trim_class_name(class).to_string(),
            method: method.to_string(),
        }
    }

    /// `Class@method` 形式的标签，可调用处理器为 `name@__invoke`
    pub fn label(&self) -> String {
        match self {
            HandlerTarget::Callable(callable) => {
                format!("{}@{}", callable.name(), CALLABLE_METHOD_NAME)
            }
            HandlerTarget::ClassMethod { class, method } => format!("{}@{}", class, method),
        }
    }
}

fn trim_class_name(class: &str) -> &str {
    let is_noise = |c: char| c.is_whitespace() || c == '\0' || c == '\\';
    let mut trimmed = class.trim_matches(is_noise);
    loop {
        let before = trimmed.len();
        trimmed = trimmed.trim_start_matches("::").trim_end_matches("::");
        trimmed = trimmed.trim_matches(is_noise);
        if trimmed.len() == before {
            return trimmed;
        }
    }
}

impl From<&str> for HandlerTarget {
    fn from(target: &str) -> Self {
        HandlerTarget::parse(target)
    }
}

impl From<String> for HandlerTarget {
    fn from(target: String) -> Self {
        HandlerTarget::parse(&target)
    }
}

impl From<CallableHandler> for HandlerTarget {
    fn from(callable: CallableHandler) -> Self {
        HandlerTarget::Callable(callable)
    }
}

/// 处理器描述符
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    target: HandlerTarget,
    middleware: Vec<MiddlewareRef>,
}

impl HandlerDescriptor {
    pub fn new<T, I>(target: T, middleware: I) -> Self
    where
        T: Into<HandlerTarget>,
        I: IntoIterator<Item = MiddlewareRef>,
    {
        Self {
            target: target.into(),
            middleware: middleware.into_iter().collect(),
        }
    }

    /// 在栈尾追加中间件，保持原有顺序
    pub fn add_middleware<I>(&mut self, more: I) -> &mut Self
    where
        I: IntoIterator<Item = MiddlewareRef>,
    {
        self.middleware.extend(more);
        self
    }

    pub fn target(&self) -> &HandlerTarget {
        &self.target
    }

    pub fn middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    pub fn label(&self) -> String {
        self.target.label()
    }

    /// 转换为可序列化的记录，可调用目标或中间件实例会失败
    pub fn to_record(&self) -> Result<DescriptorRecord, SnapshotError> {
        let target = match &self.target {
            HandlerTarget::Callable(_) => {
                return Err(SnapshotError::CallableHandler {
                    target: self.label(),
                })
            }
            HandlerTarget::ClassMethod { .. } => self.label(),
        };

        let middleware = self
            .middleware
            .iter()
            .map(|entry| match entry {
                MiddlewareRef::Named(name) => Ok(name.clone()),
                MiddlewareRef::Instance(instance) => Err(SnapshotError::LiveMiddleware {
                    target: target.clone(),
                    middleware: instance.name().to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DescriptorRecord { target, middleware })
    }

    pub fn from_record(record: DescriptorRecord) -> Self {
        Self::new(
            HandlerTarget::parse(&record.target),
            record.middleware.into_iter().map(MiddlewareRef::Named),
        )
    }

    /// 编码为 JSON 文本
    pub fn encode(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(&self.to_record()?)?)
    }

    pub fn decode(encoded: &str) -> Result<Self, SnapshotError> {
        let record: DescriptorRecord = serde_json::from_str(encoded)?;
        Ok(Self::from_record(record))
    }
}

/// 描述符的规范序列化形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub target: String,
    #[serde(default)]
    pub middleware: Vec<String>,
}
