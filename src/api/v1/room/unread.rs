use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;

use crate::response::{respond_any, respond_err};
use crate::server::ChatServer;

#[derive(serde::Deserialize)]
pub struct UnreadQuery {
    pub uid: String,
    pub room_id: String,
}

#[derive(serde::Serialize, Debug)]
pub struct UnreadResponse {
    pub uid: String,
    pub room_id: String,
    pub count: usize,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(room_unread_handle)));
}

pub async fn room_unread_handle(
    server: web::Data<Arc<ChatServer>>,
    query: web::Query<UnreadQuery>,
) -> impl Responder {
    match server.unread(&query.uid, &query.room_id).await {
        Ok(count) => respond_any(
            StatusCode::OK,
            UnreadResponse { uid: query.uid.clone(), room_id: query.room_id.clone(), count },
        ),
        Err(e) => respond_err(&e),
    }
}
