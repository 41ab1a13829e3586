//! 中间件链执行器
//!
//! 每个请求会经过两段链：
//!
//! 1. **预路由链** - 路由器级中间件，终点是路由匹配
//! 2. **路由链** - 匹配到的描述符自己的中间件，终点是处理器调度
//!
//! 游标位置只增不减，终点只会执行一次

use crate::binder::{bind, BoundArgs};
use crate::constants::ROUTER_CONTEXT_LABEL;
use crate::controller::ControllerParams;
use crate::exception::RouterError;
use crate::exception_handler::{annotate, ContextHint};
use crate::handler::{HandlerDescriptor, HandlerTarget, MiddlewareRef};
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// 请求级计时器
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch(Instant);

impl Stopwatch {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    /// 自请求开始经过的毫秒数
    pub fn elapsed_ms(&self) -> f64 {
        self.0.elapsed().as_secs_f64() * 1000.0
    }
}

/// 游标状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// 正在执行中间件
    Running,
    /// 正在执行终点
    Dispatching,
    /// 终点已执行完毕
    Done,
}

enum Terminal<'a> {
    MatchRoute,
    Dispatch(&'a Arc<HandlerDescriptor>),
}

/// 执行游标，作为 `Next` 交给每个中间件
pub struct ExecutionCursor<'a> {
    router: &'a Router,
    stack: &'a [MiddlewareRef],
    position: usize,
    state: CursorState,
    terminal: Terminal<'a>,
    stopwatch: Stopwatch,
}

impl<'a> ExecutionCursor<'a> {
    /// 预路由链
    pub(crate) fn preroute(
        router: &'a Router,
        stack: &'a [MiddlewareRef],
        stopwatch: Stopwatch,
    ) -> Self {
        Self::with_terminal(router, stack, Terminal::MatchRoute, stopwatch)
    }

    /// 路由链
    pub(crate) fn route(
        router: &'a Router,
        descriptor: &'a Arc<HandlerDescriptor>,
        stopwatch: Stopwatch,
    ) -> Self {
        Self::with_terminal(
            router,
            descriptor.middleware(),
            Terminal::Dispatch(descriptor),
            stopwatch,
        )
    }

    fn with_terminal(
        router: &'a Router,
        stack: &'a [MiddlewareRef],
        terminal: Terminal<'a>,
        stopwatch: Stopwatch,
    ) -> Self {
        Self {
            router,
            stack,
            position: 0,
            state: CursorState::Running,
            terminal,
            stopwatch,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// 已经进入的中间件数量
    pub fn position(&self) -> usize {
        self.position
    }

    fn resolve(
        &self,
        entry: &MiddlewareRef,
    ) -> anyhow::Result<(Arc<dyn Middleware>, ContextHint)> {
        match entry {
            MiddlewareRef::Instance(instance) => {
                Ok((Arc::clone(instance), ContextHint::Middleware(Arc::clone(instance))))
            }
            MiddlewareRef::Named(name) => {
                let hint = ContextHint::NamedMiddleware(name.clone());
                match self.router.middleware_registry().get(name) {
                    Ok(instance) => Ok((instance, hint)),
                    Err(error) => Err(annotate(error.into(), hint)),
                }
            }
        }
    }

    async fn run_middleware(
        &mut self,
        entry: &MiddlewareRef,
        request: &mut Request,
    ) -> anyhow::Result<Response> {
        let (middleware, hint) = self.resolve(entry)?;
        tracing::debug!(
            elapsed_ms = self.stopwatch.elapsed_ms(),
            middleware = %entry.label(),
            "Router: Calling middleware"
        );

        middleware
            .process(request, self)
            .await
            .map_err(|error| annotate(error, hint))
    }

    async fn run_terminal(&mut self, request: &mut Request) -> anyhow::Result<Response> {
        self.state = CursorState::Dispatching;
        let result = match self.terminal {
            Terminal::MatchRoute => self
                .router
                .match_route(request, self.stopwatch)
                .await
                .map_err(|error| {
                    annotate(error, ContextHint::Label(ROUTER_CONTEXT_LABEL.to_string()))
                }),
            Terminal::Dispatch(descriptor) => self
                .dispatch(descriptor, request)
                .await
                .map_err(|error| annotate(error, ContextHint::Handler(Arc::clone(descriptor)))),
        };
        self.state = CursorState::Done;
        result
    }

    async fn dispatch(
        &self,
        descriptor: &Arc<HandlerDescriptor>,
        request: &mut Request,
    ) -> anyhow::Result<Response> {
        let params = request
            .extensions_mut()
            .remove::<ControllerParams>()
            .ok_or(RouterError::MissingControllerParams)?;
        let dereferencer = self.router.parameter_dereferencer();

        let output = match descriptor.target() {
            HandlerTarget::Callable(callable) => {
                let args = if callable.params().is_empty() {
                    BoundArgs::positional(params.args)
                } else {
                    bind(callable.params(), params.args, dereferencer)?
                };
                tracing::debug!(
                    elapsed_ms = self.stopwatch.elapsed_ms(),
                    handler = %callable.name(),
                    "Router: Calling handler"
                );
                callable.handler().call(request, args).await?
            }
            HandlerTarget::ClassMethod { class, method } => {
                let definition = self
                    .router
                    .controller_registry()
                    .get(class)
                    .ok_or_else(|| RouterError::UnknownController(class.clone()))?;
                let declared = definition
                    .params_for(method)
                    .ok_or_else(|| RouterError::UnknownMethod {
                        class: class.clone(),
                        method: method.clone(),
                    })?;

                let args = bind(declared, params.args, dereferencer)?;
                let controller = definition.instantiate(&params.constructor_args)?;

                tracing::debug!(
                    elapsed_ms = self.stopwatch.elapsed_ms(),
                    controller = %class,
                    method = %method,
                    "Router: Calling controller"
                );
                controller.call(method, request, args).await?
            }
        };

        tracing::debug!(elapsed_ms = self.stopwatch.elapsed_ms(), "Router: Handler returned");
        Ok(output.into_response())
    }
}

#[async_trait]
impl<'a> Next for ExecutionCursor<'a> {
    async fn process(&mut self, request: &mut Request) -> anyhow::Result<Response> {
        if self.state != CursorState::Running {
            return Err(annotate(
                RouterError::ChainCompleted.into(),
                ContextHint::Label(ROUTER_CONTEXT_LABEL.to_string()),
            ));
        }

        let stack: &'a [MiddlewareRef] = self.stack;
        match stack.get(self.position) {
            Some(entry) => {
                self.position += 1;
                self.run_middleware(entry, request).await
            }
            None => self.run_terminal(request).await,
        }
    }
}
