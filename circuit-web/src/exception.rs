//! HTTP 失败类型与路由器编程错误

use http::header::ALLOW;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::Value;
use std::error::Error as StdError;
use thiserror::Error;

/// HTTP 失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Gone,
    /// 组件抛出的非 HTTP 失败，或者执行期间的 panic
    Uncaught,
    /// 任意状态码
    Status,
}

/// 带状态码的请求失败
///
/// 任何组件都可以返回 `HttpError`，异常解析器按状态码选择处理器。
/// 其他错误类型会被包装成 `Uncaught`
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HttpError {
    kind: HttpErrorKind,
    status: StatusCode,
    message: String,
    context: Option<Value>,
    headers: HeaderMap,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HttpError {
    /// 任意状态码的失败
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::with_kind(HttpErrorKind::Status, status, message)
    }

    fn with_kind(kind: HttpErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            context: None,
            headers: HeaderMap::new(),
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_kind(HttpErrorKind::BadRequest, StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_kind(HttpErrorKind::Forbidden, StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(HttpErrorKind::NotFound, StatusCode::NOT_FOUND, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::with_kind(HttpErrorKind::Gone, StatusCode::GONE, message)
    }

    /// 405，并设置 `Allow` 头（方法名大写，逗号分隔）
    pub fn method_not_allowed<S: AsRef<str>>(allowed: &[S], message: impl Into<String>) -> Self {
        let allow = allowed
            .iter()
            .map(|method| method.as_ref().to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");

        let mut error = Self::with_kind(
            HttpErrorKind::MethodNotAllowed,
            StatusCode::METHOD_NOT_ALLOWED,
            message,
        );
        if let Ok(value) = HeaderValue::from_str(&allow) {
            error.headers.insert(ALLOW, value);
        }
        error
    }

    /// 包装组件抛出的非 HTTP 失败（501）
    pub fn uncaught(source: anyhow::Error) -> Self {
        let mut error = Self::with_kind(
            HttpErrorKind::Uncaught,
            StatusCode::NOT_IMPLEMENTED,
            "Uncaught exception",
        );
        error.source = Some(source.into());
        error
    }

    /// 执行期间发生 panic（503）
    pub fn fault(message: impl Into<String>) -> Self {
        Self::with_kind(
            HttpErrorKind::Uncaught,
            StatusCode::SERVICE_UNAVAILABLE,
            message,
        )
    }

    /// 附加任意上下文数据
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// 附加响应头，异常解析器会把它们复制到最终响应上
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// 附加底层原因
    pub fn with_source(mut self, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// 路由表快照编解码错误
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("handler '{target}' is a callable and cannot be serialized")]
    CallableHandler { target: String },

    #[error("handler '{target}' holds a live middleware instance '{middleware}'")]
    LiveMiddleware { target: String, middleware: String },

    #[error("unsupported snapshot version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    #[error("invalid HTTP method '{0}' in snapshot")]
    InvalidMethod(String),

    #[error(transparent)]
    Encoding(#[from] serde_json::Error),
}

/// 路由器配置或使用方式上的编程错误，统一按 500 处理
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("No middleware registered under name '{0}'")]
    UnknownMiddleware(String),

    #[error("No controller registered under name '{0}'")]
    UnknownController(String),

    #[error("Controller '{class}' has no method '{method}'")]
    UnknownMethod { class: String, method: String },

    #[error("Middleware chain already completed, next() called after dispatch")]
    ChainCompleted,

    #[error("Routes have not been defined, call define_routes() first")]
    RoutesNotDefined,

    #[error("Controller parameters missing from request")]
    MissingControllerParams,

    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Route table snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}
