//! Web 服务器模块
//!
//! 基于 Axum 的传输层：所有请求都交给同一个 fallback 处理器，
//! 由 `Router::run` 完成调度

use crate::constants::DEFAULT_BODY_LIMIT;
use crate::request::Request;
use crate::router::Router;
use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use circuit_core::constants::{SERVER_BODY_LIMIT, SERVER_HOST, SERVER_PORT};
use circuit_core::Environment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Web 服务器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 请求体大小上限（字节）
    pub body_limit: usize,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_string_or(SERVER_HOST, &defaults.host),
            port: env
                .get_i64(SERVER_PORT)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(defaults.port),
            body_limit: env
                .get_i64(SERVER_BODY_LIMIT)
                .and_then(|limit| usize::try_from(limit).ok())
                .unwrap_or(defaults.body_limit),
        }
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServerState {
    router: Arc<Router>,
    body_limit: usize,
}

/// Circuit Web 服务器
pub struct CircuitWebServer {
    /// 服务器配置
    config: ServerProperties,

    /// 已定义路由的路由器
    router: Arc<Router>,
}

impl CircuitWebServer {
    pub fn new(config: ServerProperties, router: Arc<Router>) -> Self {
        Self { config, router }
    }

    /// 转换为 Axum 路由，可以挂到已有的 Axum 应用上
    pub fn into_axum(self) -> axum::Router {
        let state = ServerState {
            router: self.router,
            body_limit: self.config.body_limit,
        };
        axum::Router::new().fallback(dispatch).with_state(state)
    }

    /// 启动服务器
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.address();
        let app = self.into_axum().into_make_service();

        tracing::info!("🚀 Starting Circuit Web Server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        tracing::info!("✅ Server listening on http://{}", addr);

        axum::serve(listener, app).await.context("Server error")?;

        Ok(())
    }
}

async fn dispatch(State(state): State<ServerState>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(uri = %parts.uri, error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "413 Payload Too Large").into_response();
        }
    };

    state
        .router
        .run(Request::from_parts(parts, body))
        .await
        .map(Body::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_collector::RouteCollector;
    use crate::handler::CallableHandler;
    use circuit_core::MapPropertySource;
    use tower::ServiceExt;

    async fn echo_server(body_limit: usize) -> axum::Router {
        let mut router = Router::builder().build();
        router
            .define_routes(|routes: &mut RouteCollector| {
                routes.post(
                    "/echo",
                    CallableHandler::from_fn("echo", |request, _| {
                        Ok(String::from_utf8_lossy(request.body()).into_owned().into())
                    }),
                );
            })
            .await
            .unwrap();

        let config = ServerProperties {
            body_limit,
            ..ServerProperties::default()
        };
        CircuitWebServer::new(config, Arc::new(router)).into_axum()
    }

    fn post(body: &'static str) -> axum::extract::Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_requests_reach_router() {
        let app = echo_server(1024).await;
        let response = app.oneshot(post("hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let app = echo_server(4).await;
        let response = app.oneshot(post("far too long")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(SERVER_HOST, "127.0.0.1")
                .with_property(SERVER_PORT, 9000_i64),
        );
        let properties = ServerProperties::from_environment(&env);
        assert_eq!(properties.address(), "127.0.0.1:9000");
        assert_eq!(properties.body_limit, DEFAULT_BODY_LIMIT);
    }
}
