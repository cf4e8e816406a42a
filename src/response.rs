use actix_web::{http::StatusCode, HttpResponse};

use crate::error::ChatError;

// 通用 HTTP 响应封装（结构体自动转 JSON，失败则原样文本）
// Generic HTTP response helpers: auto JSON from struct, fallback to text

pub fn respond_any<T: serde::Serialize + std::fmt::Debug>(
    code: StatusCode,
    data: T,
) -> HttpResponse {
    match serde_json::to_value(&data) {
        Ok(v) => HttpResponse::build(code).json(v),
        Err(_) => HttpResponse::build(code)
            .content_type("text/plain; charset=utf-8")
            .body(format!("{:?}", data)),
    }
}

// 错误统一为 {"error": ...} 体 / Errors render as an {"error": ...} body
pub fn respond_err(err: &ChatError) -> HttpResponse {
    respond_any(err.status_code(), serde_json::json!({ "error": format!("{}", err) }))
}
