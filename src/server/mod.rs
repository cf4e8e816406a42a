use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;

use crate::config::LimitsConfig;
use crate::domain::{
    ChatMessage, Cursor, LedgerSnapshot, MessageKind, PresenceEvent, ReadStatus, ReceiptEvent,
    Role, RoomEvent, RoomParticipants,
};
use crate::error::ChatError;
use crate::service::{read_status, AccessControl, RoomBus};
use crate::storage::{MessageLog, PageDirection, ReadLedger};

/// 客户端连接信息 / Client connection information
#[derive(Clone)]
pub struct Connection {
    pub conn_id: String,                        // 连接唯一ID / Connection unique ID
    pub user_id: String,                        // 用户ID / User ID
    pub addr: SocketAddr,                       // 客户端地址 / Client address
    pub sender: mpsc::UnboundedSender<Message>, // 消息发送器 / Message sender
    pub rooms: Vec<String>,                     // 已订阅房间 / Subscribed rooms
    pub last_heartbeat: Arc<std::sync::Mutex<std::time::Instant>>, // 最后心跳时间 / Last heartbeat time
}

/// 服务端全局状态 / Server global state
///
/// 消息日志与已读账本是仅有的持久共享状态；其余皆可由连接生命周期重建。
/// The message log and read ledger are the only durable shared state;
/// everything else is rebuilt from connection lifecycles.
pub struct ChatServer {
    pub messages: Arc<MessageLog>,                  // 消息日志 / Message log
    pub ledger: Arc<ReadLedger>,                    // 已读账本 / Read ledger
    pub bus: Arc<RoomBus>,                          // 房间扇出总线 / Room fan-out bus
    pub access: Arc<dyn AccessControl>,             // 访问控制协作方 / Access collaborator
    pub connections: Arc<DashMap<String, Connection>>, // WS连接注册表 / WS connection registry
    pub limits: LimitsConfig,                       // 接口限额 / API limits
}

impl ChatServer {
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        ChatServer {
            messages: Arc::new(MessageLog::new()),
            ledger: Arc::new(ReadLedger::new()),
            bus: Arc::new(RoomBus::new()),
            access,
            connections: Arc::new(DashMap::new()),
            limits: LimitsConfig::default(),
        }
    }

    /// 配置接口限额 / Configure API limits
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn participants(&self, room_id: &str) -> RoomParticipants {
        self.access
            .participants_of(room_id)
            .await
            .unwrap_or_else(|| RoomParticipants { room_id: room_id.to_string(), ..Default::default() })
    }

    /// 发送消息：校验、追加、扇出，一条路径
    /// Send a message: validate, append, fan out, one path
    pub async fn send_message(
        &self,
        user_id: &str,
        room_id: &str,
        body: &str,
    ) -> Result<SendOutcome, ChatError> {
        if !self.access.can_access(user_id, room_id).await {
            return Err(ChatError::Forbidden);
        }
        let role = self.access.role_of(user_id, room_id).await;
        let display = self.access.display_name(user_id).await;
        let message = self.messages.append(
            room_id,
            user_id,
            &display,
            role,
            MessageKind::Text,
            body,
            Self::now_ms(),
        )?;
        let participants = self.participants(room_id).await;
        let ledger = self.ledger.snapshot(room_id);
        let read_status = read_status::compute_status(&message, &ledger, &participants);
        info!("💬 Message {} appended to room {} by {} ({})", message.id, room_id, user_id, role.label());
        self.bus.publish(RoomEvent::Message { message: message.clone(), read_status });
        Ok(SendOutcome {
            message_id: message.id,
            created_at: message.created_at,
            read_status,
            read_ledger: ledger,
        })
    }

    /// 历史分页：无锚点时取最新一页 / History paging; the latest page by default
    pub async fn history(
        &self,
        user_id: &str,
        room_id: &str,
        limit: Option<usize>,
        after: Option<Cursor>,
        before: Option<Cursor>,
    ) -> Result<HistoryOutcome, ChatError> {
        if !self.access.can_access(user_id, room_id).await {
            return Err(ChatError::Forbidden);
        }
        let limit = limit
            .unwrap_or(self.limits.history_default)
            .clamp(1, self.limits.history_max);
        let (anchor, direction) = match (after, before) {
            (Some(a), _) => (Some(a), PageDirection::Forward),
            (None, Some(b)) => (Some(b), PageDirection::Backward),
            (None, None) => (None, PageDirection::Backward),
        };
        let page = self.messages.page(room_id, anchor, limit, direction);
        let ledger = self.ledger.snapshot(room_id);
        let participants = self.participants(room_id).await;
        let viewer_role = self.access.role_of(user_id, room_id).await;
        let items: Vec<HistoryItem> = page
            .items
            .into_iter()
            .map(|m| {
                let reads = read_status::compute_status(&m, &ledger, &participants);
                HistoryItem { message: m, reads }
            })
            .collect();
        let paging = Paging {
            order: "asc".to_string(),
            has_more_before: matches!(direction, PageDirection::Backward)
                .then_some(page.has_more_before),
            oldest: items.first().map(|i| Cursor::of(&i.message)),
            newest: items.last().map(|i| Cursor::of(&i.message)),
        };
        Ok(HistoryOutcome { items, read_ledger: ledger, viewer_role, participants, paging })
    }

    /// 标记已读：账本单调写，成功时广播回执
    /// Mark read: monotonic ledger write; fan a receipt out on success
    pub async fn mark_read(&self, user_id: &str, room_id: &str) -> Result<MarkReadOutcome, ChatError> {
        if !self.access.can_access(user_id, room_id).await {
            return Err(ChatError::Forbidden);
        }
        let role = self.access.role_of(user_id, room_id).await;
        let at = Self::now_ms();
        let (updated, snapshot) = self.ledger.mark_read(room_id, role, at)?;
        let participants = self.participants(room_id).await;
        let role_read =
            read_status::role_read_map(self.messages.latest_at(room_id), &snapshot, &participants);
        if updated {
            self.bus.publish(RoomEvent::Receipt(ReceiptEvent {
                room_id: room_id.to_string(),
                role,
                at,
                ledger: snapshot,
                reads: role_read,
            }));
        }
        Ok(MarkReadOutcome { updated, read_ledger: snapshot, role_read })
    }

    pub async fn unread(&self, user_id: &str, room_id: &str) -> Result<usize, ChatError> {
        if !self.access.can_access(user_id, room_id).await {
            return Err(ChatError::Forbidden);
        }
        let role = self.access.role_of(user_id, room_id).await;
        let ledger = self.ledger.snapshot(room_id);
        Ok(read_status::count_unread(&self.messages, room_id, role, user_id, &ledger))
    }

    /// 收件箱房间列表，按最近活动排序并带未读数
    /// Inbox room list, ordered by latest activity, with unread counts
    pub async fn room_list(&self, user_id: &str) -> Vec<RoomSummary> {
        let mut rooms = Vec::new();
        for (room_id, latest_at) in self.messages.rooms_by_recency() {
            if !self.access.can_access(user_id, &room_id).await {
                continue;
            }
            let role = self.access.role_of(user_id, &room_id).await;
            let ledger = self.ledger.snapshot(&room_id);
            let unread =
                read_status::count_unread(&self.messages, &room_id, role, user_id, &ledger);
            rooms.push(RoomSummary { room_id, latest_message_at: latest_at, unread });
        }
        rooms
    }

    /// 输入状态中继：不落盘，直接回灌房间频道
    /// Typing relay: never persisted, straight back onto the room channel
    pub fn publish_presence(&self, event: PresenceEvent) {
        self.bus.publish(RoomEvent::Presence(event));
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SendOutcome {
    pub message_id: u64,
    pub created_at: i64,
    pub read_status: ReadStatus,
    pub read_ledger: LedgerSnapshot,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryItem {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub reads: ReadStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Paging {
    pub order: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more_before: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<Cursor>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryOutcome {
    pub items: Vec<HistoryItem>,
    pub read_ledger: LedgerSnapshot,
    pub viewer_role: Role,
    pub participants: RoomParticipants,
    pub paging: Paging,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MarkReadOutcome {
    pub updated: bool,
    pub read_ledger: LedgerSnapshot,
    pub role_read: ReadStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoomSummary {
    pub room_id: String,
    pub latest_message_at: i64,
    pub unread: usize,
}

/// 便捷克隆 / Convenience clone
impl Clone for ChatServer {
    fn clone(&self) -> Self {
        ChatServer {
            messages: self.messages.clone(),
            ledger: self.ledger.clone(),
            bus: self.bus.clone(),
            access: self.access.clone(),
            connections: self.connections.clone(),
            limits: self.limits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::StaticAccess;

    fn server() -> ChatServer {
        let acl = StaticAccess::new(false);
        acl.grant_admin("a1");
        acl.insert_room(RoomParticipants {
            room_id: "project_7".into(),
            client_user_id: Some("c1".into()),
            pm_user_id: Some("p1".into()),
        });
        ChatServer::new(Arc::new(acl))
    }

    #[tokio::test]
    async fn send_requires_access() {
        let s = server();
        assert!(matches!(
            s.send_message("stranger", "project_7", "hi").await,
            Err(ChatError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn send_then_mark_read_moves_status() {
        let s = server();
        let sent = s.send_message("c1", "project_7", "hello").await.unwrap();
        assert!(sent.read_status.client);
        assert!(!sent.read_status.pm);
        assert!(!sent.read_status.admin);

        let marked = s.mark_read("p1", "project_7").await.unwrap();
        assert!(marked.updated);
        let history = s.history("c1", "project_7", None, None, None).await.unwrap();
        let reads = history.items[0].reads;
        assert!(reads.client && reads.pm);
        assert!(!reads.admin);
    }

    #[tokio::test]
    async fn mark_read_replay_is_a_noop_with_snapshot() {
        let s = server();
        s.send_message("c1", "project_7", "hello").await.unwrap();
        let first = s.mark_read("p1", "project_7").await.unwrap();
        assert!(first.updated);
        // 账本时间戳按毫秒取整，紧接着的重放多半同毫秒 / an immediate
        // replay lands in the same millisecond and must not regress
        let replay = s.mark_read("p1", "project_7").await.unwrap();
        assert!(replay.read_ledger.pm >= first.read_ledger.pm);
    }

    #[tokio::test]
    async fn unread_excludes_viewer_rows() {
        let s = server();
        s.send_message("c1", "project_7", "one").await.unwrap();
        s.send_message("p1", "project_7", "two").await.unwrap();
        assert_eq!(s.unread("c1", "project_7").await.unwrap(), 1);
        assert_eq!(s.unread("p1", "project_7").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn room_list_filters_by_access() {
        let acl = StaticAccess::new(false);
        acl.insert_room(RoomParticipants {
            room_id: "project_1".into(),
            client_user_id: Some("c1".into()),
            pm_user_id: None,
        });
        acl.insert_room(RoomParticipants {
            room_id: "project_2".into(),
            client_user_id: Some("c1".into()),
            pm_user_id: None,
        });
        let s = ChatServer::new(Arc::new(acl));
        s.send_message("c1", "project_1", "old").await.unwrap();
        s.send_message("c1", "project_2", "new").await.unwrap();
        let rooms = s.room_list("c1").await;
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].unread, 0);
        let rooms = s.room_list("nobody").await;
        assert!(rooms.is_empty());
    }
}
