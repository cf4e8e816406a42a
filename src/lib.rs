//! chat-sync - 房间聊天实时同步引擎
//! chat-sync - realtime per-room chat synchronization engine
//!
//! 服务端持有追加式消息日志与单调已读账本；客户端会话负责规范化、
//! 回声去重、读取可见性、输入状态与轮询回退。
//! The server side owns the append-only message log and the monotonic read
//! ledger; the client session covers normalization, echo dedup, read-on-view,
//! typing presence, and the polling fallback.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod realtime;
pub mod response;
pub mod router;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod ws;

pub use error::ChatError;
pub use server::ChatServer;
pub use session::RealtimeSession;

/// 初始化日志 / Initialize logging
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .ok();
}
