//! # Circuit Web
//!
//! 中间件链式的请求调度引擎，基于 Axum 提供 HTTP 传输
//!
//! ## 核心特性
//!
//! - **处理器描述符** - `Class@method` 或可调用对象，附带自己的中间件栈
//! - **中间件链** - 预路由链与路由链，洋葱模型，可短路
//! - **参数绑定** - 先按名称、再按位置绑定路由参数
//! - **异常解析** - 按状态码选择异常处理器，并给出出错组件
//! - **路由表缓存** - 可序列化的路由表写入键值缓存，重启后直接恢复

pub mod binder;
pub mod constants;
pub mod controller;
pub mod exception;
pub mod exception_handler;
pub mod executor;
pub mod handler;
pub mod matcher;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route_collector;
pub mod router;
pub mod server;

// 导出 inventory，供 `inventory::submit!` 注册控制器和异常处理器
pub use http;
pub use inventory;

pub use binder::{bind, ArgKey, BoundArgs, CapturedArgs, ParameterDereferencer};
pub use controller::{
    ConstructorArgs, Controller, ControllerDefinition, ControllerParams, ControllerRegistration,
    ControllerRegistry,
};
pub use exception::{HttpError, HttpErrorKind, RouterError, SnapshotError};
pub use exception_handler::{
    DefaultHandler, ErrorResponse, ExceptionHandler, ExceptionHandlerRegistration,
    ExceptionHandlerRegistry,
};
pub use executor::CursorState;
pub use handler::{CallableHandler, Handler, HandlerDescriptor, HandlerTarget, MiddlewareRef};
pub use matcher::{PatternMatcher, RouteMatch, RouteMatcher};
pub use middleware::{
    AutowireController, ErrorLogger, Middleware, MiddlewareRegistry, Next, RequestId,
    RequestLogger,
};
pub use request::Request;
pub use response::{HandlerOutput, Response};
pub use route_collector::{RouteCollector, RouteTable};
pub use router::{Router, RouterBuilder, RouterProperties, RouterState};
pub use server::{CircuitWebServer, ServerProperties};

pub mod prelude {
    //! 预导入模块

    pub use crate::binder::{BoundArgs, CapturedArgs, ParameterDereferencer};
    pub use crate::controller::{
        ConstructorArgs, Controller, ControllerDefinition, ControllerRegistration,
    };
    pub use crate::exception::{HttpError, RouterError};
    pub use crate::exception_handler::{ErrorResponse, ExceptionHandler, ExceptionHandlerRegistration};
    pub use crate::handler::{CallableHandler, HandlerDescriptor, MiddlewareRef};
    pub use crate::middleware::{
        AutowireController, ErrorLogger, Middleware, Next, RequestId, RequestLogger,
    };
    pub use crate::request::Request;
    pub use crate::response::{self, HandlerOutput, Response};
    pub use crate::route_collector::RouteCollector;
    pub use crate::router::{Router, RouterProperties};
    pub use crate::server::{CircuitWebServer, ServerProperties};

    pub use async_trait::async_trait;
    pub use http::{Method, StatusCode};
}
