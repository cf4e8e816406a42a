use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;

use crate::response::{respond_any, respond_err};
use crate::server::ChatServer;

#[derive(serde::Deserialize)]
pub struct SendRequest {
    pub uid: String,
    pub room_id: String,
    pub content: String,
}

// 路由注册入口（POST）/ Route registration (POST)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(send_handle)));
}

// 发送消息 / Send a message
pub async fn send_handle(
    server: web::Data<Arc<ChatServer>>,
    req: web::Json<SendRequest>,
) -> impl Responder {
    match server.send_message(&req.uid, &req.room_id, &req.content).await {
        Ok(outcome) => respond_any(StatusCode::OK, outcome),
        Err(e) => respond_err(&e),
    }
}
