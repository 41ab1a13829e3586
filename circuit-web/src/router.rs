//! 路由器
//!
//! 负责整个请求生命周期：预路由中间件、路由匹配、路由中间件、处理器调度，
//! 以及把任何失败交给异常处理器转换为响应。
//!
//! 路由表只构建一次，能序列化时写入缓存，下次启动直接从缓存恢复

use crate::binder::ParameterDereferencer;
use crate::constants::{CALLABLE_METHOD_NAME, DEFAULT_CACHE_KEY, DEFAULT_CACHE_TTL};
use crate::controller::{ConstructorArgs, ControllerDefinition, ControllerParams, ControllerRegistry};
use crate::exception::{HttpError, RouterError};
use crate::exception_handler::{ExceptionHandler, ExceptionHandlerRegistry, ExceptionResolver};
use crate::executor::{ExecutionCursor, Stopwatch};
use crate::handler::{HandlerDescriptor, HandlerTarget, MiddlewareRef};
use crate::matcher::{PatternMatcher, RouteMatch, RouteMatcher};
use crate::middleware::{Middleware, MiddlewareRegistry, Next};
use crate::request::Request;
use crate::response::{finalize, Response};
use crate::route_collector::{RouteCollector, RouteTable};
use circuit_core::constants::{ROUTER_CACHE_KEY, ROUTER_CACHE_TTL, ROUTER_PREROUTE_MIDDLEWARE};
use circuit_core::{Environment, KeyValueCache, Service, ServiceLookup};
use futures_util::FutureExt;
use http::StatusCode;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// 路由器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterProperties {
    /// 路由表快照的缓存键
    pub cache_key: String,
    /// 路由表快照有效期
    pub cache_ttl: Duration,
    /// 按注册名引用的预路由中间件
    pub preroute_middleware: Vec<String>,
}

impl Default for RouterProperties {
    fn default() -> Self {
        Self {
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            preroute_middleware: Vec::new(),
        }
    }
}

impl RouterProperties {
    /// 从配置环境读取 `router.*`，缺省项使用默认值
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            cache_key: env.get_string_or(ROUTER_CACHE_KEY, &defaults.cache_key),
            cache_ttl: env
                .get_duration_secs(ROUTER_CACHE_TTL)
                .unwrap_or(defaults.cache_ttl),
            preroute_middleware: env
                .get_string_array(ROUTER_PREROUTE_MIDDLEWARE)
                .unwrap_or_default(),
        }
    }
}

/// 匹配引擎工厂
pub type MatcherFactory =
    Arc<dyn Fn(&RouteTable) -> Result<Arc<dyn RouteMatcher>, RouterError> + Send + Sync>;

fn pattern_matcher_factory() -> MatcherFactory {
    Arc::new(|table: &RouteTable| {
        let matcher: Arc<dyn RouteMatcher> = Arc::new(PatternMatcher::compile(table)?);
        Ok(matcher)
    })
}

/// 路由器构建器
pub struct RouterBuilder {
    properties: RouterProperties,
    cache: Option<Arc<dyn KeyValueCache>>,
    matcher_factory: MatcherFactory,
    services: Option<Arc<dyn ServiceLookup>>,
    controllers: ControllerRegistry,
    middleware: MiddlewareRegistry,
    exception_handlers: ExceptionHandlerRegistry,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            properties: RouterProperties::default(),
            cache: None,
            matcher_factory: pattern_matcher_factory(),
            services: None,
            controllers: ControllerRegistry::new(),
            middleware: MiddlewareRegistry::new(),
            exception_handlers: ExceptionHandlerRegistry::new(),
        }
    }
}

impl RouterBuilder {
    pub fn properties(mut self, properties: RouterProperties) -> Self {
        self.properties = properties;
        self
    }

    /// 路由表快照的缓存后端
    pub fn cache(mut self, cache: Arc<dyn KeyValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 替换默认的正则匹配引擎
    pub fn matcher_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RouteTable) -> Result<Arc<dyn RouteMatcher>, RouterError> + Send + Sync + 'static,
    {
        self.matcher_factory = Arc::new(factory);
        self
    }

    pub fn services(mut self, services: Arc<dyn ServiceLookup>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn controllers(mut self, controllers: ControllerRegistry) -> Self {
        self.controllers = controllers;
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, name: impl Into<String>, middleware: M) -> Self {
        self.middleware.register(name, middleware);
        self
    }

    pub fn exception_handlers(mut self, handlers: ExceptionHandlerRegistry) -> Self {
        self.exception_handlers = handlers;
        self
    }

    pub fn build(self) -> Router {
        let preroute = self
            .properties
            .preroute_middleware
            .iter()
            .cloned()
            .map(MiddlewareRef::Named)
            .collect();

        tracing::debug!(
            cache_key = %self.properties.cache_key,
            cache = self.cache.is_some(),
            controllers = self.controllers.len(),
            "Router created"
        );

        Router {
            properties: self.properties,
            cache: self.cache,
            table: None,
            cached: false,
            matcher: None,
            matcher_factory: self.matcher_factory,
            middleware: self.middleware,
            preroute,
            exception_handlers: self.exception_handlers,
            controllers: self.controllers,
            controller_args: ConstructorArgs::new(),
            services: self.services,
            dereferencer: None,
        }
    }
}

/// 路由器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// 还没有路由表，`run` 会返回 500
    Uninitialized,
    /// 可以处理请求
    Ready,
}

/// 路由器
pub struct Router {
    properties: RouterProperties,
    cache: Option<Arc<dyn KeyValueCache>>,
    table: Option<RouteTable>,
    cached: bool,
    matcher: Option<Arc<dyn RouteMatcher>>,
    matcher_factory: MatcherFactory,
    middleware: MiddlewareRegistry,
    preroute: Vec<MiddlewareRef>,
    exception_handlers: ExceptionHandlerRegistry,
    controllers: ControllerRegistry,
    controller_args: ConstructorArgs,
    services: Option<Arc<dyn ServiceLookup>>,
    dereferencer: Option<Arc<dyn ParameterDereferencer>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn state(&self) -> RouterState {
        if self.matcher.is_some() {
            RouterState::Ready
        } else {
            RouterState::Uninitialized
        }
    }

    /// 路由表是否来自缓存
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn properties(&self) -> &RouterProperties {
        &self.properties
    }

    pub fn route_table(&self) -> Option<&RouteTable> {
        self.table.as_ref()
    }

    /// 注册命名中间件
    pub fn register_middleware<M: Middleware + 'static>(
        &mut self,
        name: impl Into<String>,
        middleware: M,
    ) -> &mut Self {
        self.middleware.register(name, middleware);
        self
    }

    pub fn register_middleware_arc(
        &mut self,
        name: impl Into<String>,
        middleware: Arc<dyn Middleware>,
    ) -> &mut Self {
        self.middleware.register_arc(name, middleware);
        self
    }

    /// 追加预路由中间件，在路由匹配之前执行
    pub fn add_preroute_middleware(&mut self, entry: impl Into<MiddlewareRef>) -> &mut Self {
        self.preroute.push(entry.into());
        self
    }

    /// 为状态码设置异常处理器
    pub fn set_exception_handler<H: ExceptionHandler + 'static>(
        &mut self,
        status: StatusCode,
        handler: H,
    ) -> &mut Self {
        self.exception_handlers.set_handler(status, handler);
        self
    }

    pub fn set_default_exception_handler<H: ExceptionHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.exception_handlers.set_default_handler(handler);
        self
    }

    pub fn register_controller(&mut self, definition: ControllerDefinition) -> &mut Self {
        self.controllers.register(definition);
        self
    }

    pub fn set_service_container(&mut self, services: Arc<dyn ServiceLookup>) -> &mut Self {
        self.services = Some(services);
        self
    }

    pub fn service_container(&self) -> Option<&Arc<dyn ServiceLookup>> {
        self.services.as_ref()
    }

    /// 设置默认的控制器构造参数，`AutowireController` 会覆盖它们
    pub fn set_controller_argument(&mut self, name: impl Into<String>, service: Service) -> &mut Self {
        self.controller_args.insert(name, service);
        self
    }

    pub fn set_parameter_dereferencer<D: ParameterDereferencer + 'static>(&mut self, dereferencer: D) -> &mut Self {
        self.dereferencer = Some(Arc::new(dereferencer));
        self
    }

    pub(crate) fn middleware_registry(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    pub(crate) fn controller_registry(&self) -> &ControllerRegistry {
        &self.controllers
    }

    pub(crate) fn parameter_dereferencer(&self) -> Option<&dyn ParameterDereferencer> {
        self.dereferencer.as_deref()
    }

    /// 定义路由
    ///
    /// 已经持有路由表（之前定义过或者缓存命中）时不会调用 `define`。
    /// 新构建的路由表能序列化时写入缓存。匹配引擎编译失败时路由表既不保留也不写入缓存
    pub async fn define_routes<F>(&mut self, define: F) -> Result<&mut Self, RouterError>
    where
        F: FnOnce(&mut RouteCollector),
    {
        if self.table.is_some() && self.matcher.is_some() {
            tracing::debug!("Router: Route table already present, definition skipped");
            return Ok(self);
        }

        if let Some(table) = self.load_cached_table().await {
            match (self.matcher_factory)(&table) {
                Ok(matcher) => {
                    tracing::info!(
                        routes = table.len(),
                        cache_key = %self.properties.cache_key,
                        "Route table loaded from cache"
                    );
                    self.table = Some(table);
                    self.matcher = Some(matcher);
                    self.cached = true;
                    return Ok(self);
                }
                Err(e) => tracing::warn!(
                    cache_key = %self.properties.cache_key,
                    error = %e,
                    "Cached route table does not compile, rebuilding"
                ),
            }
        }

        let mut collector = RouteCollector::new();
        define(&mut collector);
        let table = collector.into_table();
        let matcher = (self.matcher_factory)(&table)?;
        tracing::info!(routes = table.len(), "Route table built");

        self.store_cached_table(&table).await;
        self.table = Some(table);
        self.matcher = Some(matcher);
        self.cached = false;
        Ok(self)
    }

    async fn load_cached_table(&self) -> Option<RouteTable> {
        let cache = self.cache.as_ref()?;
        let key = self.properties.cache_key.as_str();

        let encoded = match cache.get(key).await {
            Ok(Some(encoded)) => encoded,
            Ok(None) => {
                tracing::debug!(cache_key = %key, "Route table cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Route table cache read failed");
                return None;
            }
        };

        let table = match RouteTable::decode(&encoded) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Discarding unreadable route table snapshot");
                return None;
            }
        };

        if let Some(missing) = table.middleware_names().find(|name| !self.middleware.contains(name)) {
            tracing::warn!(
                cache_key = %key,
                middleware = %missing,
                "Cached route table references unregistered middleware, rebuilding"
            );
            return None;
        }

        Some(table)
    }

    async fn store_cached_table(&self, table: &RouteTable) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let key = self.properties.cache_key.as_str();

        let encoded = match table.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Route table is not cacheable, caching disabled");
                return;
            }
        };

        match cache.set(key, encoded, self.properties.cache_ttl).await {
            Ok(()) => tracing::debug!(
                cache_key = %key,
                ttl_secs = self.properties.cache_ttl.as_secs(),
                "Route table stored in cache"
            ),
            Err(e) => tracing::warn!(cache_key = %key, error = %e, "Route table cache write failed"),
        }
    }

    /// 处理一个请求，总是返回响应
    pub async fn run(&self, mut request: Request) -> Response {
        let stopwatch = Stopwatch::start();
        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            "Router: run() called"
        );

        let outcome = AssertUnwindSafe(self.process(&mut request, stopwatch))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => self.handle_exception(error, &request).await,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(path = %request.path(), error = %message, "Router: Request panicked");
                self.handle_exception(HttpError::fault(message).into(), &request)
                    .await
            }
        };

        tracing::debug!(
            elapsed_ms = stopwatch.elapsed_ms(),
            status = response.status().as_u16(),
            "Router: Preparing to send response"
        );
        finalize(response, &request)
    }

    async fn process(&self, request: &mut Request, stopwatch: Stopwatch) -> anyhow::Result<Response> {
        if self.matcher.is_none() {
            return Err(RouterError::RoutesNotDefined.into());
        }
        let mut cursor = ExecutionCursor::preroute(self, &self.preroute, stopwatch);
        cursor.process(request).await
    }

    /// 把错误转换为响应
    pub async fn handle_exception(&self, error: anyhow::Error, request: &Request) -> Response {
        ExceptionResolver::new(&self.exception_handlers, &self.middleware)
            .resolve(error, request)
            .await
    }

    /// 预路由链的终点：匹配路由并执行路由链
    pub(crate) async fn match_route(
        &self,
        request: &mut Request,
        stopwatch: Stopwatch,
    ) -> anyhow::Result<Response> {
        let matcher = self.matcher.as_ref().ok_or(RouterError::RoutesNotDefined)?;
        let path = request.route_path();
        tracing::debug!(
            elapsed_ms = stopwatch.elapsed_ms(),
            method = %request.method(),
            path = %path,
            "Router: Matching route"
        );

        match matcher.find(request.method(), &path) {
            RouteMatch::NotFound => Err(HttpError::not_found("Router: Route not matched")
                .with_context(json!({ "path": path }))
                .into()),
            RouteMatch::MethodNotAllowed { allowed } => {
                let message = format!("Router: Method not allowed: {}", request.method());
                Err(HttpError::method_not_allowed(&allowed, message)
                    .with_context(json!({ "path": path, "allowed": allowed }))
                    .into())
            }
            RouteMatch::Found {
                descriptor,
                pattern,
                params,
            } => {
                tracing::debug!(
                    elapsed_ms = stopwatch.elapsed_ms(),
                    route = %pattern,
                    handler = %descriptor.label(),
                    "Router: Route matched"
                );

                let controller_params = self.controller_params(&descriptor, pattern, params);
                request.extensions_mut().insert(controller_params);

                let mut cursor = ExecutionCursor::route(self, &descriptor, stopwatch);
                cursor.process(request).await
            }
        }
    }

    fn controller_params(
        &self,
        descriptor: &HandlerDescriptor,
        route: String,
        params: Vec<(String, String)>,
    ) -> ControllerParams {
        let (class_name, method, constructor_params) = match descriptor.target() {
            HandlerTarget::Callable(callable) => (
                callable.name().to_string(),
                CALLABLE_METHOD_NAME.to_string(),
                Vec::new(),
            ),
            HandlerTarget::ClassMethod { class, method } => (
                class.clone(),
                method.clone(),
                self.controllers
                    .get(class)
                    .map(|definition| definition.constructor_params().to_vec())
                    .unwrap_or_default(),
            ),
        };

        ControllerParams {
            route,
            class_name,
            method,
            args: params.into_iter().collect(),
            constructor_params,
            constructor_args: self.controller_args.clone(),
            services: self.services.clone(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic occurred".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BoundArgs;
    use crate::controller::Controller;
    use crate::handler::CallableHandler;
    use crate::middleware::{AutowireController, ErrorLogger};
    use crate::response::{html, HandlerOutput};
    use async_trait::async_trait;
    use circuit_core::{MapPropertySource, MemoryCache, ServiceRegistry};
    use http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
    use http::{Method, Uri};
    use parking_lot::Mutex;
    use serde_json::Value;

    struct UsersController {
        greeting: Option<Arc<String>>,
    }

    #[async_trait]
    impl Controller for UsersController {
        async fn call(
            &self,
            method: &str,
            _request: &mut Request,
            args: BoundArgs,
        ) -> anyhow::Result<HandlerOutput> {
            match method {
                "show" => {
                    let id: String = args.value("id")?;
                    let mut response = html(StatusCode::OK, "ok");
                    response
                        .headers_mut()
                        .insert("x-bound-id", http::HeaderValue::from_str(&id)?);
                    Ok(response.into())
                }
                "greet" => {
                    let greeting = self.greeting.as_deref().map(String::as_str).unwrap_or("hi");
                    let id: u32 = args.value("id")?;
                    Ok(format!("{} {}", greeting, id).into())
                }
                "fail" => anyhow::bail!("database unavailable"),
                "explode" => panic!("controller exploded"),
                other => anyhow::bail!("unexpected method {}", other),
            }
        }
    }

    fn users_definition() -> ControllerDefinition {
        ControllerDefinition::new("UsersController", |args| {
            Ok(Arc::new(UsersController {
                greeting: args.get::<String>("greeting"),
            }) as Arc<dyn Controller>)
        })
        .constructor(["greeting"])
        .method("show", ["request", "id"])
        .method("greet", ["request", "id"])
        .method("fail", ["request"])
        .method("explode", ["request"])
    }

    fn users_routes(routes: &mut RouteCollector) {
        routes.get("/users/{id}", "UsersController@show");
        routes.get("/users/{id}/greet", "UsersController@greet");
        routes.get("/fail", "UsersController@fail");
        routes.get("/explode", "UsersController@explode");
    }

    async fn ready_router() -> Router {
        let mut router = Router::builder().build();
        router.register_controller(users_definition());
        router.define_routes(users_routes).await.unwrap();
        router
    }

    fn get(uri: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static(uri))
    }

    struct ContextEcho;

    #[async_trait]
    impl ExceptionHandler for ContextEcho {
        async fn handle(&self, failure: &HttpError, _request: &Request, context: &str) -> Response {
            html(failure.status(), format!("failed in {}", context))
        }
    }

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn process(&self, request: &mut Request, next: &mut dyn Next) -> anyhow::Result<Response> {
            self.log.lock().push(self.label);
            next.process(request).await
        }
    }

    #[tokio::test]
    async fn test_controller_route_returns_text() {
        let router = ready_router().await;
        assert_eq!(router.state(), RouterState::Ready);

        let response = router.run(get("/users/42")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[CONTENT_LENGTH], "2");
        assert_eq!(response.headers()["x-bound-id"], "42");
        assert_eq!(response.body().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn test_unmatched_route_is_404() {
        let router = ready_router().await;
        let response = router.run(get("/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_ref(), b"404 Not Found");
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_with_allow() {
        let router = ready_router().await;
        let request = Request::new(Method::POST, Uri::from_static("/users/1"));
        let response = router.run(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET");
    }

    #[tokio::test]
    async fn test_handler_failure_is_501_with_context() {
        let mut router = ready_router().await;
        let response = router.run(get("/fail")).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(response.body().as_ref(), b"501 Not Implemented");

        router.set_exception_handler(StatusCode::NOT_IMPLEMENTED, ContextEcho);
        let response = router.run(get("/fail")).await;
        assert_eq!(response.body().as_ref(), b"failed in UsersController@fail");
    }

    struct Authenticate;

    #[async_trait]
    impl Middleware for Authenticate {
        async fn process(&self, _request: &mut Request, _next: &mut dyn Next) -> anyhow::Result<Response> {
            anyhow::bail!("token store offline")
        }
    }

    #[tokio::test]
    async fn test_named_middleware_failure_reports_middleware_name() {
        let mut router = Router::builder().middleware("auth", Authenticate).build();
        router
            .set_exception_handler(StatusCode::NOT_IMPLEMENTED, ContextEcho)
            .register_controller(users_definition());
        router
            .define_routes(|routes| {
                routes.add_route([Method::GET], "/users/{id}", "UsersController@show", [MiddlewareRef::from("auth")]);
            })
            .await
            .unwrap();

        let response = router.run(get("/users/1")).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(response.body().as_ref(), b"failed in Authenticate");

        router.add_preroute_middleware("auth");
        let response = router.run(get("/nowhere")).await;
        assert_eq!(response.body().as_ref(), b"failed in Authenticate");
    }

    #[tokio::test]
    async fn test_panic_is_503() {
        let router = ready_router().await;
        let response = router.run(get("/explode")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_run_before_define_routes_is_500() {
        let router = Router::builder().build();
        assert_eq!(router.state(), RouterState::Uninitialized);
        let response = router.run(get("/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_define_routes_is_idempotent() {
        let mut router = Router::builder().build();
        router.register_controller(users_definition());
        router.define_routes(users_routes).await.unwrap();

        let mut invoked = false;
        router
            .define_routes(|_| invoked = true)
            .await
            .unwrap();
        assert!(!invoked);
        assert_eq!(router.route_table().map(RouteTable::len), Some(4));
    }

    #[tokio::test]
    async fn test_warm_cache_skips_definition() {
        let cache = Arc::new(MemoryCache::new());

        let mut cold = Router::builder().cache(cache.clone()).build();
        cold.register_controller(users_definition());
        cold.define_routes(users_routes).await.unwrap();
        assert!(!cold.is_cached());
        assert_eq!(cache.len(), 1);

        let mut warm = Router::builder().cache(cache.clone()).build();
        warm.register_controller(users_definition());
        let mut invoked = false;
        warm.define_routes(|_| invoked = true).await.unwrap();
        assert!(!invoked);
        assert!(warm.is_cached());

        let cold_snapshot = cold.route_table().unwrap().encode().unwrap();
        let warm_snapshot = warm.route_table().unwrap().encode().unwrap();
        assert_eq!(cold_snapshot, warm_snapshot);

        let response = warm.run(get("/users/42")).await;
        assert_eq!(response.body().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn test_callable_routes_are_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let mut router = Router::builder().cache(cache.clone()).build();
        router
            .define_routes(|routes| {
                routes.get(
                    "/health/{probe}",
                    CallableHandler::from_fn("health", |_, args| {
                        let probe: String = args.value("probe")?;
                        Ok(Value::from(vec![probe]).into())
                    })
                    .with_params(["probe"]),
                );
            })
            .await
            .unwrap();

        assert!(cache.is_empty());
        let response = router.run(get("/health/db")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.body().as_ref(), br#"["db"]"#);
    }

    #[tokio::test]
    async fn test_stale_cache_with_unknown_middleware_is_rebuilt() {
        let cache = Arc::new(MemoryCache::new());
        let mut first = Router::builder().cache(cache.clone()).build();
        first.register_middleware("auth", ErrorLogger);
        first
            .define_routes(|routes| {
                routes.add_route([Method::GET], "/", "UsersController@show", [MiddlewareRef::from("auth")]);
            })
            .await
            .unwrap();

        let mut second = Router::builder().cache(cache.clone()).build();
        let mut invoked = false;
        second
            .define_routes(|routes| {
                invoked = true;
                routes.get("/", "UsersController@show");
            })
            .await
            .unwrap();
        assert!(invoked);
        assert!(!second.is_cached());
    }

    #[tokio::test]
    async fn test_preroute_then_route_middleware_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(ROUTER_PREROUTE_MIDDLEWARE, "first"),
        );

        let mut router = Router::builder()
            .properties(RouterProperties::from_environment(&env))
            .middleware("first", Tag { label: "first", log: log.clone() })
            .middleware("route", Tag { label: "route", log: log.clone() })
            .build();
        router
            .add_preroute_middleware(MiddlewareRef::instance(Tag { label: "second", log: log.clone() }))
            .register_controller(users_definition());
        router
            .define_routes(|routes| {
                routes.add_route([Method::GET], "/users/{id}", "UsersController@show", [MiddlewareRef::from("route")]);
            })
            .await
            .unwrap();

        let response = router.run(get("/users/1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock(), vec!["first", "second", "route"]);

        // 预路由中间件对未匹配的请求同样执行
        log.lock().clear();
        let response = router.run(get("/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_autowire_and_typed_params() {
        let services = Arc::new(ServiceRegistry::new().with("greeting", "hello".to_string()));
        let mut router = Router::builder().services(services.clone()).build();
        router
            .register_middleware("autowire", AutowireController::new(services))
            .register_controller(users_definition());
        router
            .define_routes(|routes| {
                routes.add_group("", [MiddlewareRef::from("autowire")], |group| {
                    group.get("/users/{id}/greet", "UsersController@greet");
                });
            })
            .await
            .unwrap();

        let response = router.run(get("/users/7/greet")).await;
        assert_eq!(response.body().as_ref(), b"hello 7");

        let response = router.run(get("/users/seven/greet")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_default_controller_argument() {
        let mut router = Router::builder().build();
        router
            .set_controller_argument("greeting", Arc::new("hey".to_string()))
            .register_controller(users_definition());
        router.define_routes(users_routes).await.unwrap();

        let response = router.run(get("/users/3/greet")).await;
        assert_eq!(response.body().as_ref(), b"hey 3");
    }

    #[tokio::test]
    async fn test_head_request_has_no_body() {
        let router = ready_router().await;
        let request = Request::new(Method::HEAD, Uri::from_static("/users/42"));
        let response = router.run(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "2");
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_controller_is_500() {
        let mut router = Router::builder().build();
        router
            .define_routes(|routes| {
                routes.get("/", "MissingController@index");
            })
            .await
            .unwrap();
        let response = router.run(get("/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_definition() {
        let mut router = Router::builder().build();
        let result = router
            .define_routes(|routes| {
                routes.get("/users/{id", "UsersController@show");
            })
            .await;
        assert!(matches!(result, Err(RouterError::InvalidPattern { .. })));
        assert_eq!(router.state(), RouterState::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_definition_can_be_retried() {
        let cache = Arc::new(MemoryCache::new());
        let mut router = Router::builder().cache(cache.clone()).build();
        router.register_controller(users_definition());

        let result = router
            .define_routes(|routes| {
                routes.get("/users/{id", "UsersController@show");
            })
            .await;
        assert!(result.is_err());
        assert!(router.route_table().is_none());
        assert!(cache.is_empty());

        let mut invoked = false;
        router
            .define_routes(|routes| {
                invoked = true;
                users_routes(routes);
            })
            .await
            .unwrap();
        assert!(invoked);
        assert_eq!(router.state(), RouterState::Ready);
        assert_eq!(router.run(get("/users/42")).await.status(), StatusCode::OK);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_table_that_fails_to_compile_is_rebuilt() {
        let cache = Arc::new(MemoryCache::new());
        let mut broken = RouteCollector::new();
        broken.get("/users/{id", "UsersController@show");
        let snapshot = broken.into_table().encode().unwrap();
        cache
            .set(DEFAULT_CACHE_KEY, snapshot, DEFAULT_CACHE_TTL)
            .await
            .unwrap();

        let mut router = Router::builder().cache(cache.clone()).build();
        router.register_controller(users_definition());
        let mut invoked = false;
        router
            .define_routes(|routes| {
                invoked = true;
                users_routes(routes);
            })
            .await
            .unwrap();

        assert!(invoked);
        assert!(!router.is_cached());
        assert_eq!(router.run(get("/users/42")).await.status(), StatusCode::OK);

        let stored = cache.get(DEFAULT_CACHE_KEY).await.unwrap().unwrap();
        assert_eq!(RouteTable::decode(&stored).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_parameter_dereferencer() {
        struct UserLookup;
        impl ParameterDereferencer for UserLookup {
            fn dereference(&self, param: &str, value: Value) -> anyhow::Result<Value> {
                match (param, value.as_str()) {
                    ("id", Some("404")) => Err(HttpError::not_found("No such user").into()),
                    _ => Ok(value),
                }
            }
        }

        let mut router = Router::builder().build();
        router
            .set_parameter_dereferencer(UserLookup)
            .register_controller(users_definition());
        router.define_routes(users_routes).await.unwrap();

        assert_eq!(router.run(get("/users/1/greet")).await.status(), StatusCode::OK);
        assert_eq!(router.run(get("/users/404/greet")).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(ROUTER_CACHE_KEY, "routes_test")
                .with_property(ROUTER_CACHE_TTL, 60_i64),
        );
        let properties = RouterProperties::from_environment(&env);
        assert_eq!(properties.cache_key, "routes_test");
        assert_eq!(properties.cache_ttl, Duration::from_secs(60));
        assert!(properties.preroute_middleware.is_empty());

        assert_eq!(
            RouterProperties::from_environment(&Environment::new()),
            RouterProperties::default()
        );
    }
}
