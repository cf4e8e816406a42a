use serde::{Deserialize, Serialize};

/// 参与者角色 / Participant role
///
/// 房间有三个角色槽位（client/pm/admin），其余用户为 other；
/// 系统行使用 sys 着色，不参与已读账本。
/// Rooms carry three role slots (client/pm/admin); everyone else is `other`.
/// System lines render as `sys` and never touch the read ledger.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Pm,
    Admin,
    Other,
    Sys,
}

impl Role {
    /// 账本只跟踪 client/pm/admin / Only client/pm/admin are ledger roles
    pub fn is_ledger_role(self) -> bool {
        matches!(self, Role::Client | Role::Pm | Role::Admin)
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Pm => "pm",
            Role::Admin => "admin",
            Role::Other => "other",
            Role::Sys => "sys",
        }
    }

    pub fn from_label(s: &str) -> Option<Role> {
        match s {
            "client" => Some(Role::Client),
            "pm" => Some(Role::Pm),
            "admin" => Some(Role::Admin),
            "other" => Some(Role::Other),
            "sys" | "system" => Some(Role::Sys),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    System,
}

/// 聊天消息 / Chat message
///
/// `(created_at, id)` 在房间内构成全序；id 由追加路径单调分配，追加后不可变。
/// `(created_at, id)` is a total order within a room; ids are assigned
/// monotonically by the append path and messages are immutable afterwards.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatMessage {
    pub id: u64,
    pub room_id: String,
    pub author_id: String,
    pub author_display: String,
    pub author_role: Role,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: i64,
}

/// 分页游标 / Pagination cursor
///
/// 时间戳相同则按 id 决胜，保证游标接续无缝不重复。
/// Ties on the timestamp break by id, so chained cursors never gap or repeat.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub at: i64,
    pub id: u64,
}

impl Cursor {
    pub fn of(msg: &ChatMessage) -> Cursor {
        Cursor { at: msg.created_at, id: msg.id }
    }

    pub fn is_before(&self, msg: &ChatMessage) -> bool {
        (msg.created_at, msg.id) > (self.at, self.id)
    }

    pub fn is_after(&self, msg: &ChatMessage) -> bool {
        (msg.created_at, msg.id) < (self.at, self.id)
    }
}

/// 房间参与者配置（访问控制方拥有，这里只读）
/// Room participant slots (owned by the access collaborator, read-only here)
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RoomParticipants {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm_user_id: Option<String>,
}

impl RoomParticipants {
    pub fn slot(&self, role: Role) -> Option<&str> {
        match role {
            Role::Client => self.client_user_id.as_deref(),
            Role::Pm => self.pm_user_id.as_deref(),
            _ => None,
        }
    }
}

/// 已读账本快照 / Read ledger snapshot
///
/// 每个 (房间, 角色) 一个毫秒时间戳寄存器，只增不减。
/// One millisecond-timestamp register per (room, role); never decreases.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub client: Option<i64>,
    pub pm: Option<i64>,
    pub admin: Option<i64>,
}

impl LedgerSnapshot {
    pub fn get(&self, role: Role) -> Option<i64> {
        match role {
            Role::Client => self.client,
            Role::Pm => self.pm,
            Role::Admin => self.admin,
            _ => None,
        }
    }

    /// 按值比较的单调写入；更旧的值被忽略
    /// Compare-by-value monotonic write; older values are ignored
    pub fn advance(&mut self, role: Role, at: i64) -> bool {
        let slot = match role {
            Role::Client => &mut self.client,
            Role::Pm => &mut self.pm,
            Role::Admin => &mut self.admin,
            _ => return false,
        };
        match *slot {
            Some(current) if at <= current => false,
            _ => {
                *slot = Some(at);
                true
            }
        }
    }

    /// 两份快照的单调合并，用于乐观值与权威响应的和解
    /// Monotonic merge of two snapshots, used to reconcile optimistic state
    pub fn merge_newer(&mut self, other: &LedgerSnapshot) -> bool {
        let mut changed = false;
        for role in [Role::Client, Role::Pm, Role::Admin] {
            if let Some(at) = other.get(role) {
                changed |= self.advance(role, at);
            }
        }
        changed
    }
}

/// 每条消息的派生已读状态（不持久化）
/// Derived per-message read status (never stored)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatus {
    pub client: bool,
    pub pm: bool,
    pub admin: bool,
}

impl ReadStatus {
    pub fn get(&self, role: Role) -> bool {
        match role {
            Role::Client => self.client,
            Role::Pm => self.pm,
            Role::Admin => self.admin,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_advance_is_monotonic() {
        let mut snap = LedgerSnapshot::default();
        assert!(snap.advance(Role::Pm, 150));
        assert!(!snap.advance(Role::Pm, 149));
        assert!(!snap.advance(Role::Pm, 150));
        assert_eq!(snap.pm, Some(150));
        assert!(snap.advance(Role::Pm, 151));
    }

    #[test]
    fn ledger_ignores_non_ledger_roles() {
        let mut snap = LedgerSnapshot::default();
        assert!(!snap.advance(Role::Other, 100));
        assert!(!snap.advance(Role::Sys, 100));
        assert_eq!(snap, LedgerSnapshot::default());
    }

    #[test]
    fn merge_keeps_whichever_is_newer() {
        let mut a = LedgerSnapshot { client: Some(100), pm: Some(300), admin: None };
        let b = LedgerSnapshot { client: Some(200), pm: Some(250), admin: Some(50) };
        assert!(a.merge_newer(&b));
        assert_eq!(a, LedgerSnapshot { client: Some(200), pm: Some(300), admin: Some(50) });
    }

    #[test]
    fn cursor_breaks_ties_by_id() {
        let msg = ChatMessage {
            id: 5,
            room_id: "project_1".into(),
            author_id: "u1".into(),
            author_display: "U1".into(),
            author_role: Role::Client,
            body: "hi".into(),
            kind: MessageKind::Text,
            created_at: 100,
        };
        assert!(Cursor { at: 100, id: 4 }.is_before(&msg));
        assert!(!Cursor { at: 100, id: 5 }.is_before(&msg));
        assert!(Cursor { at: 100, id: 6 }.is_after(&msg));
    }
}
