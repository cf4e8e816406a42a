use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::RoomEvent;

const ROOM_CHANNEL_CAPACITY: usize = 256;

/// 房间频道总线 / Room channel bus
///
/// 每房间一条 broadcast 通道；WS 连接、会话和轮询回灌共用同一扇出路径。
/// One broadcast channel per room; WS connections, sessions, and tests all
/// share the same fan-out path.
pub struct RoomBus {
    channels: DashMap<String, broadcast::Sender<RoomEvent>>,
}

impl RoomBus {
    pub fn new() -> Self {
        RoomBus { channels: DashMap::new() }
    }

    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<RoomEvent> {
        self.channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 无人订阅时事件直接丢弃，返回送达数
    /// Events to an unsubscribed room are dropped; returns delivered count
    pub fn publish(&self, event: RoomEvent) -> usize {
        let room_id = event.room_id().to_string();
        let delivered = self
            .channels
            .get(&room_id)
            .map(|tx| tx.send(event).unwrap_or(0))
            .unwrap_or(0);
        debug!("📢 Room {} event fanned out to {} subscribers", room_id, delivered);
        delivered
    }
}

impl Default for RoomBus {
    fn default() -> Self {
        Self::new()
    }
}
