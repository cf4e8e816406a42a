use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;

use crate::response::{respond_any, respond_err};
use crate::server::ChatServer;

#[derive(serde::Deserialize)]
pub struct ReadRequest {
    pub uid: String,
    pub room_id: String,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(read_mark_handle)));
}

// 标记已读，过期写入返回 updated=false / Mark read; stale writes come back updated=false
pub async fn read_mark_handle(
    server: web::Data<Arc<ChatServer>>,
    req: web::Json<ReadRequest>,
) -> impl Responder {
    match server.mark_read(&req.uid, &req.room_id).await {
        Ok(outcome) => respond_any(StatusCode::OK, outcome),
        Err(e) => respond_err(&e),
    }
}
