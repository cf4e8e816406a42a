use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use std::sync::Arc;

use crate::domain::Cursor;
use crate::response::{respond_any, respond_err};
use crate::server::ChatServer;

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    pub uid: String,
    pub room_id: String,
    pub limit: Option<usize>,
    // 游标成分可以只给时间戳，id 缺省取方向上的边界值
    // Cursor halves may come alone; a missing id defaults to the
    // directional boundary
    pub after_at: Option<i64>,
    pub after_id: Option<u64>,
    pub before_at: Option<i64>,
    pub before_id: Option<u64>,
}

// 路由注册入口（GET）/ Route registration (GET)
pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(history_handle)));
}

// 历史消息查询 / Query message history
pub async fn history_handle(
    server: web::Data<Arc<ChatServer>>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    let after = query.after_at.map(|at| Cursor { at, id: query.after_id.unwrap_or(0) });
    let before = query.before_at.map(|at| Cursor { at, id: query.before_id.unwrap_or(u64::MAX) });
    match server.history(&query.uid, &query.room_id, query.limit, after, before).await {
        Ok(outcome) => respond_any(StatusCode::OK, outcome),
        Err(e) => respond_err(&e),
    }
}
