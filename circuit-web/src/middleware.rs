//! 中间件模块
//!
//! 中间件拿到请求和一个 `Next` 句柄，可以修改请求、短路返回响应，
//! 或者调用 `next.process()` 把请求交给链上的下一项并处理它的结果

use crate::constants::REQUEST_ID_HEADER;
use crate::controller::{ConstructorArgs, ControllerParams};
use crate::exception::RouterError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use circuit_core::ServiceLookup;
use http::{HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// 链上的后续部分
#[async_trait]
pub trait Next: Send {
    /// 执行链上的下一项，没有剩余中间件时执行终点
    async fn process(&mut self, request: &mut Request) -> anyhow::Result<Response>;
}

/// 中间件 trait
#[async_trait]
pub trait Middleware: Send + Sync {
    /// 日志和异常上下文里使用的名称
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    async fn process(&self, request: &mut Request, next: &mut dyn Next) -> anyhow::Result<Response>;
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// 中间件注册表，名称唯一
#[derive(Default, Clone)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册中间件，同名会被替换
    pub fn register<M: Middleware + 'static>(&mut self, name: impl Into<String>, middleware: M) {
        self.register_arc(name, Arc::new(middleware));
    }

    pub fn register_arc(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        let name = name.into();
        if self.entries.insert(name.clone(), middleware).is_some() {
            tracing::warn!(middleware = %name, "Middleware replaced");
        } else {
            tracing::debug!(middleware = %name, "Middleware registered");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Middleware>, RouterError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::UnknownMiddleware(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 记录失败后原样抛出
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLogger;

#[async_trait]
impl Middleware for ErrorLogger {
    async fn process(&self, request: &mut Request, next: &mut dyn Next) -> anyhow::Result<Response> {
        match next.process(request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                tracing::error!(
                    method = %request.method(),
                    path = %request.path(),
                    error = %format!("{:#}", error),
                    "Request failed"
                );
                Err(error)
            }
        }
    }
}

/// 按构造参数名从服务容器装配控制器依赖
///
/// 只能放在路由中间件里，匹配成功后请求上才有 `ControllerParams`
pub struct AutowireController {
    services: Arc<dyn ServiceLookup>,
}

impl AutowireController {
    pub fn new(services: Arc<dyn ServiceLookup>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Middleware for AutowireController {
    async fn process(&self, request: &mut Request, next: &mut dyn Next) -> anyhow::Result<Response> {
        let params = request
            .extensions_mut()
            .get_mut::<ControllerParams>()
            .ok_or(RouterError::MissingControllerParams)?;

        let resolved = params
            .constructor_params
            .iter()
            .map(|name| {
                let service = self.services.get(name);
                if service.is_none() {
                    tracing::debug!(
                        controller = %params.class_name,
                        param = %name,
                        "No service registered for constructor parameter"
                    );
                }
                (name.clone(), service)
            })
            .collect::<Vec<_>>();

        params.constructor_args = ConstructorArgs::from_pairs(resolved);
        params.services = Some(Arc::clone(&self.services));

        next.process(request).await
    }
}

/// 请求日志中间件
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn process(&self, request: &mut Request, next: &mut dyn Next) -> anyhow::Result<Response> {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let start = Instant::now();

        let result = next.process(request).await;

        let elapsed = start.elapsed();
        match &result {
            Ok(response) => tracing::info!(
                method = %method,
                uri = %uri,
                status = %response.status().as_u16(),
                elapsed = ?elapsed,
                "Request completed"
            ),
            Err(_) => tracing::info!(
                method = %method,
                uri = %uri,
                elapsed = ?elapsed,
                "Request completed with failure"
            ),
        }

        result
    }
}

/// 请求 ID 中间件
///
/// 请求和响应都带上 `X-Request-ID`，请求已有时沿用
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestId;

#[async_trait]
impl Middleware for RequestId {
    async fn process(&self, request: &mut Request, next: &mut dyn Next) -> anyhow::Result<Response> {
        let header = HeaderName::from_static(REQUEST_ID_HEADER);
        let request_id = match request.headers().get(&header) {
            Some(existing) => existing.clone(),
            None => {
                let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())?;
                request.headers_mut().insert(header.clone(), generated.clone());
                generated
            }
        };

        let mut response = next.process(request).await?;
        response.headers_mut().insert(header, request_id);
        Ok(response)
    }
}
