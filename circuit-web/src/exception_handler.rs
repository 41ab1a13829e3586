//! 异常处理模块
//!
//! 链上任何组件返回的错误最终都会走到这里：
//!
//! 1. **分类** - `HttpError` 原样使用，路由器编程错误转为 500，其他错误包装为 501
//! 2. **定位** - 从错误上附带的上下文提示得出出错组件的标签
//! 3. **选择处理器** - 先按状态码，再用默认处理器，最后是内置的 `DefaultHandler`
//! 4. **补充响应头** - 失败对象上的响应头复制到处理器生成的响应上

use crate::constants::ROUTER_CONTEXT_LABEL;
use crate::exception::{HttpError, RouterError};
use crate::handler::HandlerDescriptor;
use crate::middleware::{Middleware, MiddlewareRegistry};
use crate::request::Request;
use crate::response::{self, Response};
use async_trait::async_trait;
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 异常处理器 trait
///
/// 处理器不会失败，总是返回一个响应
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// `context` 是出错组件的标签，例如 `UsersController@show`
    async fn handle(&self, failure: &HttpError, request: &Request, context: &str) -> Response;
}

/// 标准错误响应格式
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>, // 出错组件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>, // 额外错误详情
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: String, path: String) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Unknown Error").to_string(),
            message,
            path,
            context: None,
            details: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match serde_json::to_value(&self) {
            Ok(body) => response::json(status, &body),
            Err(_) => response::html(status, status_line(status)),
        }
    }
}

fn status_line(status: StatusCode) -> String {
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Error")
    )
}

/// 内置处理器
///
/// 默认输出 `"{状态码} {原因短语}"` 的 text/html，
/// 请求声明接受 JSON 时输出 `ErrorResponse`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

#[async_trait]
impl ExceptionHandler for DefaultHandler {
    fn name(&self) -> &str {
        "DefaultHandler"
    }

    async fn handle(&self, failure: &HttpError, request: &Request, context: &str) -> Response {
        let status = failure.status();
        if request.accepts_json() {
            let mut body =
                ErrorResponse::new(status, failure.message().to_string(), request.path().to_string())
                    .with_context(context);
            if let Some(details) = failure.context() {
                body = body.with_details(details.clone());
            }
            return body.into_response();
        }

        response::html(status, status_line(status))
    }
}

/// 异常处理器注册信息
///
/// 用于编译期自动发现异常处理器，`status` 为 `None` 时作为默认处理器
pub struct ExceptionHandlerRegistration {
    pub status: Option<u16>,
    pub create: fn() -> Arc<dyn ExceptionHandler>,
}

inventory::collect!(ExceptionHandlerRegistration);

/// 异常处理器注册表
#[derive(Clone)]
pub struct ExceptionHandlerRegistry {
    by_status: HashMap<StatusCode, Arc<dyn ExceptionHandler>>,
    default_handler: Option<Arc<dyn ExceptionHandler>>,
    fallback: Arc<dyn ExceptionHandler>,
}

impl Default for ExceptionHandlerRegistry {
    fn default() -> Self {
        Self {
            by_status: HashMap::new(),
            default_handler: None,
            fallback: Arc::new(DefaultHandler),
        }
    }
}

impl ExceptionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 收集所有通过 `inventory::submit!` 注册的处理器
    pub fn from_inventory() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<ExceptionHandlerRegistration> {
            let handler = (registration.create)();
            match registration.status.map(StatusCode::from_u16) {
                None => registry.set_default_handler_arc(handler),
                Some(Ok(status)) => registry.set_handler_arc(status, handler),
                Some(Err(_)) => tracing::warn!(
                    handler = handler.name(),
                    status = ?registration.status,
                    "Ignoring exception handler registered for invalid status"
                ),
            }
        }
        registry
    }

    /// 为状态码设置处理器，替换已有的
    pub fn set_handler<H: ExceptionHandler + 'static>(&mut self, status: StatusCode, handler: H) {
        self.set_handler_arc(status, Arc::new(handler));
    }

    pub fn set_handler_arc(&mut self, status: StatusCode, handler: Arc<dyn ExceptionHandler>) {
        tracing::debug!(status = status.as_u16(), handler = handler.name(), "Exception handler set");
        self.by_status.insert(status, handler);
    }

    /// 设置默认处理器，没有按状态码注册的处理器时使用
    pub fn set_default_handler<H: ExceptionHandler + 'static>(&mut self, handler: H) {
        self.set_default_handler_arc(Arc::new(handler));
    }

    pub fn set_default_handler_arc(&mut self, handler: Arc<dyn ExceptionHandler>) {
        tracing::debug!(handler = handler.name(), "Default exception handler set");
        self.default_handler = Some(handler);
    }

    /// 选择处理器：状态码 > 默认处理器 > 内置处理器
    pub fn select(&self, status: StatusCode) -> &Arc<dyn ExceptionHandler> {
        self.by_status
            .get(&status)
            .or(self.default_handler.as_ref())
            .unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.by_status.len() + usize::from(self.default_handler.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 出错组件的提示
#[derive(Clone)]
pub enum ContextHint {
    Middleware(Arc<dyn Middleware>),
    NamedMiddleware(String),
    Handler(Arc<HandlerDescriptor>),
    Label(String),
}

impl ContextHint {
    fn describe(&self) -> String {
        match self {
            ContextHint::Middleware(middleware) => middleware.name().to_string(),
            ContextHint::NamedMiddleware(name) | ContextHint::Label(name) => name.clone(),
            ContextHint::Handler(descriptor) => descriptor.label(),
        }
    }
}

impl fmt::Debug for ContextHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextHint({})", self.describe())
    }
}

/// 附加在错误上的上下文，最内层的组件先附加，外层不覆盖
#[derive(Debug, Clone)]
pub(crate) struct FailureContext(pub(crate) ContextHint);

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in {}", self.0.describe())
    }
}

/// 为错误附加上下文提示，已有提示时保持不变
pub(crate) fn annotate(error: anyhow::Error, hint: ContextHint) -> anyhow::Error {
    if error.downcast_ref::<FailureContext>().is_some() {
        error
    } else {
        error.context(FailureContext(hint))
    }
}

/// 把错误转换为失败对象
pub(crate) fn classify(error: anyhow::Error) -> HttpError {
    let error = match error.downcast::<HttpError>() {
        Ok(failure) => return failure,
        Err(error) => error,
    };

    match error.downcast::<RouterError>() {
        Ok(router_error) => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            .with_source(router_error),
        Err(other) => HttpError::uncaught(other),
    }
}

/// 异常解析器
pub struct ExceptionResolver<'a> {
    handlers: &'a ExceptionHandlerRegistry,
    middleware: &'a MiddlewareRegistry,
}

impl<'a> ExceptionResolver<'a> {
    pub fn new(handlers: &'a ExceptionHandlerRegistry, middleware: &'a MiddlewareRegistry) -> Self {
        Self {
            handlers,
            middleware,
        }
    }

    /// 出错组件的标签，没有提示时为 `Router`
    ///
    /// 注册名会先查注册表取中间件自己的 `name()`，查不到时使用注册名本身
    pub fn context_label(&self, hint: Option<&ContextHint>) -> String {
        match hint {
            None => ROUTER_CONTEXT_LABEL.to_string(),
            Some(ContextHint::NamedMiddleware(name)) => match self.middleware.get(name) {
                Ok(instance) => instance.name().to_string(),
                Err(_) => name.clone(),
            },
            Some(other) => other.describe(),
        }
    }

    /// 把错误转换为响应
    pub async fn resolve(&self, error: anyhow::Error, request: &Request) -> Response {
        let hint = error
            .downcast_ref::<FailureContext>()
            .map(|context| context.0.clone());
        let context = self.context_label(hint.as_ref());

        if let Some(failure) = error.downcast_ref::<HttpError>() {
            tracing::debug!(
                status = failure.status().as_u16(),
                context = %context,
                "Router: Handling exception"
            );
        } else {
            tracing::error!(
                context = %context,
                error = %format!("{:#}", error),
                "Router: Handling uncaught exception"
            );
        }

        let failure = classify(error);
        let handler = self.handlers.select(failure.status());
        tracing::debug!(handler = handler.name(), "Router: Exception handler selected");

        let mut response = handler.handle(&failure, request, &context).await;

        let headers = response.headers_mut();
        for name in failure.headers().keys() {
            headers.remove(name);
        }
        for (name, value) in failure.headers() {
            headers.append(name.clone(), value.clone());
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::HttpErrorKind;
    use crate::handler::MiddlewareRef;
    use crate::middleware::ErrorLogger;
    use http::header::{ACCEPT, ALLOW, CONTENT_TYPE};
    use http::{HeaderValue, Method, Uri};

    fn request() -> Request {
        Request::new(Method::GET, Uri::from_static("/users/42"))
    }

    struct Teapot;

    #[async_trait]
    impl ExceptionHandler for Teapot {
        async fn handle(&self, failure: &HttpError, _request: &Request, context: &str) -> Response {
            response::html(failure.status(), format!("teapot via {}", context))
        }
    }

    #[test]
    fn test_classify() {
        let failure = classify(HttpError::not_found("gone fishing").into());
        assert_eq!(failure.status(), StatusCode::NOT_FOUND);

        let failure = classify(RouterError::ChainCompleted.into());
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let failure = classify(anyhow::anyhow!("boom"));
        assert_eq!(failure.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(failure.kind(), HttpErrorKind::Uncaught);
    }

    #[test]
    fn test_annotation_keeps_innermost() {
        let descriptor = Arc::new(HandlerDescriptor::new("UsersController@show", []));
        let error = annotate(
            HttpError::forbidden("nope").into(),
            ContextHint::Handler(descriptor),
        );
        let error = annotate(error, ContextHint::NamedMiddleware("auth".into()));

        let context = error.downcast_ref::<FailureContext>().unwrap();
        assert_eq!(context.0.describe(), "UsersController@show");
        assert_eq!(classify(error).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_context_label_uses_middleware_name() {
        let mut middleware = MiddlewareRegistry::new();
        middleware.register("errors", ErrorLogger);
        let handlers = ExceptionHandlerRegistry::new();
        let resolver = ExceptionResolver::new(&handlers, &middleware);

        let named = ContextHint::NamedMiddleware("errors".to_string());
        assert_eq!(resolver.context_label(Some(&named)), "ErrorLogger");

        let unknown = ContextHint::NamedMiddleware("missing".to_string());
        assert_eq!(resolver.context_label(Some(&unknown)), "missing");

        let registered = middleware.get("errors").unwrap();
        assert_eq!(
            resolver.context_label(Some(&ContextHint::Middleware(registered))),
            "ErrorLogger"
        );

        let inline = match MiddlewareRef::instance(ErrorLogger) {
            MiddlewareRef::Instance(instance) => instance,
            MiddlewareRef::Named(_) => unreachable!(),
        };
        assert_eq!(
            resolver.context_label(Some(&ContextHint::Middleware(inline))),
            "ErrorLogger"
        );
        assert_eq!(resolver.context_label(None), "Router");
    }

    #[test]
    fn test_select_order() {
        let mut registry = ExceptionHandlerRegistry::new();
        assert_eq!(registry.select(StatusCode::NOT_FOUND).name(), "DefaultHandler");

        registry.set_default_handler(Teapot);
        registry.set_handler(StatusCode::NOT_FOUND, DefaultHandler);
        assert_eq!(registry.select(StatusCode::NOT_FOUND).name(), "DefaultHandler");
        assert!(registry.select(StatusCode::GONE).name().ends_with("Teapot"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_default_handler_html_and_json() {
        let failure = HttpError::not_found("Route not matched");

        let html = DefaultHandler.handle(&failure, &request(), "Router").await;
        assert_eq!(html.status(), StatusCode::NOT_FOUND);
        assert_eq!(html.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(html.body().as_ref(), b"404 Not Found");

        let json_request =
            request().with_header(ACCEPT, HeaderValue::from_static("application/json"));
        let json = DefaultHandler.handle(&failure, &json_request, "Router").await;
        assert_eq!(json.headers()[CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(json.body()).unwrap();
        assert_eq!(body["status"], 404);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["path"], "/users/42");
        assert_eq!(body["context"], "Router");
    }

    #[tokio::test]
    async fn test_resolve_copies_failure_headers() {
        let handlers = ExceptionHandlerRegistry::new();
        let middleware = MiddlewareRegistry::new();
        let resolver = ExceptionResolver::new(&handlers, &middleware);

        let error = HttpError::method_not_allowed(&["GET", "PUT"], "Method not allowed").into();
        let response = resolver.resolve(error, &request()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET, PUT");
    }

    #[tokio::test]
    async fn test_resolve_passes_context_to_handler() {
        let mut handlers = ExceptionHandlerRegistry::new();
        handlers.set_handler(StatusCode::NOT_IMPLEMENTED, Teapot);
        let middleware = MiddlewareRegistry::new();
        let resolver = ExceptionResolver::new(&handlers, &middleware);

        let descriptor = Arc::new(HandlerDescriptor::new("UsersController@show", []));
        let error = annotate(anyhow::anyhow!("boom"), ContextHint::Handler(descriptor));
        let response = resolver.resolve(error, &request()).await;

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(response.body().as_ref(), b"teapot via UsersController@show");
    }
}
