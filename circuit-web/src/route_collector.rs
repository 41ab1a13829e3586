//! 路由收集
//!
//! `define_routes` 的回调通过 `RouteCollector` 声明路由。
//! 分组会给组内路由加上路径前缀，并把分组中间件放到每条路由自己的中间件之前

use crate::constants::SNAPSHOT_VERSION;
use crate::exception::SnapshotError;
use crate::handler::{CallableHandler, DescriptorRecord, HandlerDescriptor, HandlerTarget, MiddlewareRef};
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 路由处理器：目标或完整的描述符
pub enum RouteHandler {
    Target(HandlerTarget),
    Descriptor(HandlerDescriptor),
}

impl From<&str> for RouteHandler {
    fn from(target: &str) -> Self {
        RouteHandler::Target(HandlerTarget::parse(target))
    }
}

impl From<String> for RouteHandler {
    fn from(target: String) -> Self {
        RouteHandler::Target(HandlerTarget::parse(&target))
    }
}

impl From<CallableHandler> for RouteHandler {
    fn from(callable: CallableHandler) -> Self {
        RouteHandler::Target(HandlerTarget::Callable(callable))
    }
}

impl From<HandlerDescriptor> for RouteHandler {
    fn from(descriptor: HandlerDescriptor) -> Self {
        RouteHandler::Descriptor(descriptor)
    }
}

/// 一条路由
#[derive(Debug, Clone)]
pub struct RouteEntry {
    methods: Vec<Method>,
    pattern: String,
    descriptor: Arc<HandlerDescriptor>,
}

impl RouteEntry {
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }
}

#[derive(Serialize, Deserialize)]
struct RouteRecord {
    methods: Vec<String>,
    pattern: String,
    handler: DescriptorRecord,
}

#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    version: u32,
    routes: Vec<RouteRecord>,
}

/// 路由表，保持声明顺序
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 路由表引用的所有中间件注册名
    pub fn middleware_names(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().flat_map(|route| {
            route.descriptor.middleware().iter().filter_map(|entry| match entry {
                MiddlewareRef::Named(name) => Some(name.as_str()),
                MiddlewareRef::Instance(_) => None,
            })
        })
    }

    /// 编码为快照，含可调用目标或中间件实例时失败
    pub fn encode(&self) -> Result<String, SnapshotError> {
        let routes = self
            .routes
            .iter()
            .map(|route| {
                Ok(RouteRecord {
                    methods: route.methods.iter().map(|m| m.as_str().to_string()).collect(),
                    pattern: route.pattern.clone(),
                    handler: route.descriptor.to_record()?,
                })
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        let snapshot = TableSnapshot {
            version: SNAPSHOT_VERSION,
            routes,
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// 从快照恢复
    pub fn decode(encoded: &str) -> Result<Self, SnapshotError> {
        let snapshot: TableSnapshot = serde_json::from_str(encoded)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let routes = snapshot
            .routes
            .into_iter()
            .map(|record| {
                let methods = record
                    .methods
                    .iter()
                    .map(|m| {
                        Method::from_bytes(m.as_bytes())
                            .map_err(|_| SnapshotError::InvalidMethod(m.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RouteEntry {
                    methods,
                    pattern: record.pattern,
                    descriptor: Arc::new(HandlerDescriptor::from_record(record.handler)),
                })
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        Ok(Self { routes })
    }
}

/// 路由收集器
#[derive(Debug, Default)]
pub struct RouteCollector {
    routes: Vec<RouteEntry>,
    prefix: String,
    group_middleware: Vec<MiddlewareRef>,
}

impl RouteCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加路由
    ///
    /// 中间件栈为：当前分组中间件，然后是 `middleware`。
    /// 传入现成的描述符时，这些中间件追加在描述符自己的栈之后
    pub fn add_route<M, I>(
        &mut self,
        methods: M,
        pattern: &str,
        handler: impl Into<RouteHandler>,
        middleware: I,
    ) -> &mut Self
    where
        M: IntoIterator<Item = Method>,
        I: IntoIterator<Item = MiddlewareRef>,
    {
        let mut stack = self.group_middleware.clone();
        stack.extend(middleware);

        let descriptor = match handler.into() {
            RouteHandler::Target(target) => HandlerDescriptor::new(target, stack),
            RouteHandler::Descriptor(mut descriptor) => {
                descriptor.add_middleware(stack);
                descriptor
            }
        };

        let pattern = format!("{}{}", self.prefix, pattern);
        tracing::debug!(pattern = %pattern, handler = %descriptor.label(), "Route added");

        self.routes.push(RouteEntry {
            methods: methods.into_iter().collect(),
            pattern,
            descriptor: Arc::new(descriptor),
        });
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl Into<RouteHandler>) -> &mut Self {
        self.add_route([Method::GET], pattern, handler, [])
    }

    pub fn post(&mut self, pattern: &str, handler: impl Into<RouteHandler>) -> &mut Self {
        self.add_route([Method::POST], pattern, handler, [])
    }

    pub fn put(&mut self, pattern: &str, handler: impl Into<RouteHandler>) -> &mut Self {
        self.add_route([Method::PUT], pattern, handler, [])
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Into<RouteHandler>) -> &mut Self {
        self.add_route([Method::DELETE], pattern, handler, [])
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Into<RouteHandler>) -> &mut Self {
        self.add_route([Method::PATCH], pattern, handler, [])
    }

    pub fn head(&mut self, pattern: &str, handler: impl Into<RouteHandler>) -> &mut Self {
        self.add_route([Method::HEAD], pattern, handler, [])
    }

    /// 路由分组，可以嵌套
    pub fn add_group<I, F>(&mut self, prefix: &str, middleware: I, define: F) -> &mut Self
    where
        I: IntoIterator<Item = MiddlewareRef>,
        F: FnOnce(&mut RouteCollector),
    {
        let outer_prefix = self.prefix.clone();
        let outer_middleware = self.group_middleware.clone();

        self.prefix = format!("{}{}", outer_prefix, prefix);
        self.group_middleware.extend(middleware);

        define(self);

        self.prefix = outer_prefix;
        self.group_middleware = outer_middleware;
        self
    }

    pub fn into_table(self) -> RouteTable {
        RouteTable {
            routes: self.routes,
        }
    }
}
