use actix_web::web;

/// 路由配置包装 / Route configuration wrapper
pub fn configure(cfg: &mut web::ServiceConfig) {
    crate::api::v1::health::basic::register(cfg, "/v1/health");
    crate::api::v1::message::send::register(cfg, "/v1/message/send");
    crate::api::v1::message::history::register(cfg, "/v1/message/history");
    crate::api::v1::message::read::register(cfg, "/v1/message/read");
    crate::api::v1::room::unread::register(cfg, "/v1/room/unread");
    crate::api::v1::room::list::register(cfg, "/v1/room/list");
}
