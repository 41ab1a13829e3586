//! 响应构建与处理器返回值转换

use crate::request::Request;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;

/// HTTP 响应
pub type Response = http::Response<Bytes>;

const TEXT_HTML: &str = "text/html";
const TEXT_HTML_UTF8: &str = "text/html; charset=UTF-8";
const APPLICATION_JSON: &str = "application/json";

/// 构建指定状态码和内容类型的响应
pub fn with_content_type(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// `text/html` 响应
pub fn html(status: StatusCode, body: impl Into<String>) -> Response {
    with_content_type(status, TEXT_HTML, Bytes::from(body.into()))
}

/// `application/json` 响应
pub fn json(status: StatusCode, value: &Value) -> Response {
    with_content_type(status, APPLICATION_JSON, Bytes::from(value.to_string()))
}

/// 处理器返回值
///
/// 控制器可以返回完整的响应、结构化数据或纯文本，
/// 由执行器在 Done 状态统一转换为响应
#[derive(Debug)]
pub enum HandlerOutput {
    /// 已经是响应，原样透传
    Response(Response),
    /// 结构化数据（对象或数组），包装为 JSON 200
    Json(Value),
    /// 其他标量，包装为 text/html 200
    Text(String),
}

impl HandlerOutput {
    /// 序列化任意值，结构体和集合成为 JSON，标量成为文本
    pub fn serialize<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    pub fn into_response(self) -> Response {
        match self {
            HandlerOutput::Response(response) => response,
            HandlerOutput::Json(value) => json(StatusCode::OK, &value),
            HandlerOutput::Text(text) => html(StatusCode::OK, text),
        }
    }
}

impl From<Response> for HandlerOutput {
    fn from(response: Response) -> Self {
        HandlerOutput::Response(response)
    }
}

impl From<String> for HandlerOutput {
    fn from(text: String) -> Self {
        HandlerOutput::Text(text)
    }
}

impl From<&str> for HandlerOutput {
    fn from(text: &str) -> Self {
        HandlerOutput::Text(text.to_string())
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(_) | Value::Array(_) => HandlerOutput::Json(value),
            Value::String(text) => HandlerOutput::Text(text),
            Value::Null => HandlerOutput::Text(String::new()),
            scalar => HandlerOutput::Text(scalar.to_string()),
        }
    }
}

/// 发送前根据请求补全响应
///
/// - 1xx / 204 / 304 不带响应体，也不带 Content-Type / Content-Length
/// - 非空响应体缺少 Content-Type 时默认 `text/html; charset=UTF-8`
/// - 缺少 Content-Length 时按响应体长度补上
/// - HEAD 请求保留头部、清空响应体
pub fn finalize(mut response: Response, request: &Request) -> Response {
    let status = response.status();
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        *response.body_mut() = Bytes::new();
        response.headers_mut().remove(CONTENT_TYPE);
        response.headers_mut().remove(CONTENT_LENGTH);
        return response;
    }

    let length = response.body().len();
    let headers = response.headers_mut();
    if length > 0 && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML_UTF8));
    }
    if !headers.contains_key(CONTENT_LENGTH) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    if request.method() == Method::HEAD {
        *response.body_mut() = Bytes::new();
    }

    response
}
