//! WebSocket 桥 - 把房间总线接到外部订阅端
//! WebSocket bridge - connects the room bus to external subscribers

pub mod connection;
pub mod sender;
pub mod server;
