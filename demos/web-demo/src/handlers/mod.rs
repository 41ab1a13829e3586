//! 自定义异常处理器
//!
//! 404 统一返回 JSON，其他状态码仍由内置处理器处理

use circuit_web::inventory;
use circuit_web::prelude::*;
use std::sync::Arc;

pub struct NotFoundHandler;

#[async_trait]
impl ExceptionHandler for NotFoundHandler {
    fn name(&self) -> &str {
        "NotFoundHandler"
    }

    async fn handle(&self, failure: &HttpError, request: &Request, context: &str) -> Response {
        tracing::debug!(path = %request.path(), context, "Resource not found");
        let mut body = ErrorResponse::new(
            failure.status(),
            failure.message().to_string(),
            request.path().to_string(),
        )
        .with_context(context);
        if let Some(details) = failure.context() {
            body = body.with_details(details.clone());
        }
        body.into_response()
    }
}

fn not_found_handler() -> Arc<dyn ExceptionHandler> {
    Arc::new(NotFoundHandler)
}

inventory::submit! {
    ExceptionHandlerRegistration {
        status: Some(404),
        create: not_found_handler,
    }
}
