use anyhow::Result;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::server::ChatServer;

impl ChatServer {
    /// 向指定连接发送消息 / Send a message to a specific connection
    pub fn send_to_connection(&self, conn_id: &str, message: Message) -> Result<()> {
        if let Some(connection) = self.connections.get(conn_id) {
            connection
                .sender
                .send(message)
                .map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;
            debug!("📤 Sent message to connection {}", conn_id);
            Ok(())
        } else {
            warn!("⚠️  Connection {} not found for delivery", conn_id);
            Err(anyhow::anyhow!("Connection {} not found", conn_id))
        }
    }

    /// 发送关闭帧 / Send a close frame
    pub fn send_close_message(&self, conn_id: &str) -> Result<()> {
        if let Some(connection) = self.connections.get(conn_id) {
            connection
                .sender
                .send(Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: std::borrow::Cow::Borrowed("Connection timeout"),
                })))
                .map_err(|e| anyhow::anyhow!("Failed to send close message: {}", e))?;
            Ok(())
        } else {
            Err(anyhow::anyhow!("Connection {} not found for close", conn_id))
        }
    }

    /// 更新连接心跳 / Update a connection's heartbeat
    pub fn update_heartbeat(&self, conn_id: &str) {
        if let Some(connection) = self.connections.get(conn_id) {
            if let Ok(mut last_heartbeat) = connection.last_heartbeat.lock() {
                *last_heartbeat = std::time::Instant::now();
            }
        }
    }

    /// 清理超时连接 / Clean up timed-out connections
    pub fn cleanup_timeout_connections(&self, timeout_ms: u64) {
        let mut disconnected = Vec::new();
        for entry in self.connections.iter() {
            let connection = entry.value();
            if let Ok(last_heartbeat) = connection.last_heartbeat.lock() {
                if last_heartbeat.elapsed().as_millis() > timeout_ms as u128 {
                    disconnected.push(entry.key().clone());
                }
            }
        }
        for conn_id in disconnected {
            let _ = self.send_close_message(&conn_id);
            self.connections.remove(&conn_id);
            info!("🧹 Cleaned up timeout connection: {}", conn_id);
        }
    }
}
