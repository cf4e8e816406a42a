use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;

use crate::response::respond_any;
use crate::server::ChatServer;

#[derive(serde::Deserialize)]
pub struct RoomListQuery {
    pub uid: String,
}

#[derive(serde::Serialize, Debug)]
pub struct RoomListResponse {
    pub rooms: Vec<crate::server::RoomSummary>,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(room_list_handle)));
}

// 收件箱房间列表 / Inbox room listing
pub async fn room_list_handle(
    server: web::Data<Arc<ChatServer>>,
    query: web::Query<RoomListQuery>,
) -> impl Responder {
    let rooms = server.room_list(&query.uid).await;
    respond_any(StatusCode::OK, RoomListResponse { rooms })
}
