use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;

use crate::response::respond_any;
use crate::server::ChatServer;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_handle)));
}

pub async fn health_handle(server: web::Data<Arc<ChatServer>>) -> impl Responder {
    respond_any(
        StatusCode::OK,
        serde_json::json!({
            "status": "ok",
            "connections": server.connections.len(),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        }),
    )
}
