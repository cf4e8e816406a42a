use serde::{Deserialize, Serialize};
use serde_json::json;

use super::message::{ChatMessage, LedgerSnapshot, MessageKind, ReadStatus, Role};

/// 已读回执事件 / Read receipt event
///
/// 携带完整账本快照与角色已读映射，订阅端无需轮询即可刷新未读角标。
/// Carries the full ledger snapshot plus the role-read map so subscribers
/// can refresh unread badges without polling.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReceiptEvent {
    pub room_id: String,
    pub role: Role,
    pub at: i64,
    pub ledger: LedgerSnapshot,
    pub reads: ReadStatus,
}

/// 输入状态事件（短暂，不持久化）/ Typing presence event (ephemeral)
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PresenceEvent {
    pub room_id: String,
    pub conn_id: String,
    pub user_id: String,
    pub name: String,
    pub typing: bool,
    pub at: i64,
}

/// 房间频道上的规范事件 / Canonical event on a room channel
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Message { message: ChatMessage, read_status: ReadStatus },
    Receipt(ReceiptEvent),
    Presence(PresenceEvent),
}

impl RoomEvent {
    pub fn room_id(&self) -> &str {
        match self {
            RoomEvent::Message { message, .. } => &message.room_id,
            RoomEvent::Receipt(r) => &r.room_id,
            RoomEvent::Presence(p) => &p.room_id,
        }
    }

    /// 线格式信封 / Wire envelope
    ///
    /// 字段名沿用历史负载（message/user/user_display/role/at），
    /// 消费端一律经过规范化器解析。
    /// Field names follow the historical payloads; consumers always go
    /// through the normalizer.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            RoomEvent::Message { message, read_status } => {
                let kind = match message.kind {
                    MessageKind::Text => "text",
                    MessageKind::System => "system",
                };
                json!({
                    "type": kind,
                    "room_id": message.room_id,
                    "data": {
                        "type": kind,
                        "id": message.id,
                        "message": message.body,
                        "user": message.author_id,
                        "user_display": message.author_display,
                        "role": message.author_role.label(),
                        "at": message.created_at,
                        "reads": read_status,
                    }
                })
            }
            RoomEvent::Receipt(r) => json!({
                "type": "read_receipt",
                "room_id": r.room_id,
                "data": {
                    "role": r.role.label(),
                    "at": r.at,
                    "ledger": r.ledger,
                    "reads": r.reads,
                }
            }),
            RoomEvent::Presence(p) => json!({
                "type": "presence",
                "room_id": p.room_id,
                "data": {
                    "conn": p.conn_id,
                    "user": p.user_id,
                    "name": p.name,
                    "typing": p.typing,
                    "at": p.at,
                }
            }),
        }
    }
}
