use std::collections::HashSet;

use crate::domain::{ChatMessage, Cursor, LedgerSnapshot, ReadStatus, RoomParticipants};
use crate::service::read_status;

/// 时间线行键：乐观本地行在取得权威 id 前用本地序号标识
/// Timeline line key: optimistic local lines carry a local sequence number
/// until their authoritative id arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKey {
    Local(u64),
    Server(u64),
}

#[derive(Debug, Clone)]
pub struct TimelineLine {
    pub key: LineKey,
    pub message: ChatMessage,
    pub reads: ReadStatus,
    pub pending: bool,
}

/// 渲染时间线 / Render timeline
///
/// 服务器行按 `(created_at, id)` 保持有序并按 id 幂等合并，
/// 因此实时与轮询两条路径可以重复送达同一行而只渲染一次。
/// Server lines stay ordered by `(created_at, id)` and merge idempotently
/// by id, so the live and polling paths may both deliver a row and it still
/// renders once.
pub struct Timeline {
    lines: Vec<TimelineLine>,
    next_local: u64,
    server_ids: HashSet<u64>,
}

impl Timeline {
    pub fn new() -> Self {
        Timeline { lines: Vec::new(), next_local: 1, server_ids: HashSet::new() }
    }

    pub fn lines(&self) -> &[TimelineLine] {
        &self.lines
    }

    pub fn push_local(&mut self, message: ChatMessage, reads: ReadStatus) -> u64 {
        let key = self.next_local;
        self.next_local += 1;
        self.lines.push(TimelineLine { key: LineKey::Local(key), message, reads, pending: true });
        key
    }

    /// 按序插入服务器行；重复 id 返回 false
    /// Insert a server line in order; duplicate ids return false
    pub fn insert_server(&mut self, message: ChatMessage, reads: ReadStatus) -> bool {
        if !self.server_ids.insert(message.id) {
            return false;
        }
        let sort_key = (message.created_at, message.id);
        let pos = self
            .lines
            .iter()
            .position(|l| match l.key {
                LineKey::Server(_) => (l.message.created_at, l.message.id) > sort_key,
                // 乐观行悬在尾部 / optimistic lines hang at the tail
                LineKey::Local(_) => true,
            })
            .unwrap_or(self.lines.len());
        self.lines.insert(pos, TimelineLine { key: LineKey::Server(message.id), message, reads, pending: false });
        true
    }

    /// 把权威回声套回乐观行：应用规范 id/时间戳/已读状态，原地转正
    /// Reconcile the authoritative echo onto an optimistic line: apply the
    /// canonical id/timestamp/read status in place
    pub fn reconcile_local(&mut self, local_key: u64, id: u64, at: i64, reads: ReadStatus) -> bool {
        let Some(idx) = self.lines.iter().position(|l| l.key == LineKey::Local(local_key)) else {
            return false;
        };
        if self.server_ids.contains(&id) {
            // 另一条路径已经放入了权威行，本地行退场
            // The authoritative row arrived through the other path already;
            // drop the local line
            self.lines.remove(idx);
            return false;
        }
        self.server_ids.insert(id);
        let mut line = self.lines.remove(idx);
        line.key = LineKey::Server(id);
        line.message.id = id;
        line.message.created_at = at;
        line.reads = reads;
        line.pending = false;
        // 转正后按权威序重新落位 / re-seat by authoritative order
        let sort_key = (at, id);
        let pos = self
            .lines
            .iter()
            .position(|l| match l.key {
                LineKey::Server(_) => (l.message.created_at, l.message.id) > sort_key,
                LineKey::Local(_) => true,
            })
            .unwrap_or(self.lines.len());
        self.lines.insert(pos, line);
        true
    }

    /// 账本变化后重算每行已读映射 / Recompute read maps after a ledger change
    pub fn recompute_reads(&mut self, ledger: &LedgerSnapshot, participants: &RoomParticipants) {
        for line in &mut self.lines {
            if !line.pending {
                line.reads = read_status::compute_status(&line.message, ledger, participants);
            }
        }
    }

    /// 轮询追赶锚点：已确认行的最大 `(created_at, id)`
    /// Catch-up anchor for polling: the largest confirmed `(created_at, id)`
    pub fn latest_cursor(&self) -> Option<Cursor> {
        self.lines
            .iter()
            .filter(|l| !l.pending)
            .map(|l| Cursor::of(&l.message))
            .max_by_key(|c| (c.at, c.id))
    }

    pub fn get(&self, id: u64) -> Option<&TimelineLine> {
        self.lines.iter().find(|l| l.key == LineKey::Server(id))
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageKind, Role};

    fn msg(id: u64, at: i64) -> ChatMessage {
        ChatMessage {
            id,
            room_id: "r1".into(),
            author_id: "u1".into(),
            author_display: "U1".into(),
            author_role: Role::Client,
            body: format!("m{}", id),
            kind: MessageKind::Text,
            created_at: at,
        }
    }

    #[test]
    fn duplicate_delivery_renders_once() {
        let mut tl = Timeline::new();
        assert!(tl.insert_server(msg(44, 100), ReadStatus::default()));
        assert!(!tl.insert_server(msg(44, 100), ReadStatus::default()));
        assert_eq!(tl.lines().len(), 1);
    }

    #[test]
    fn out_of_order_delivery_sorts_by_cursor() {
        let mut tl = Timeline::new();
        tl.insert_server(msg(45, 300), ReadStatus::default());
        tl.insert_server(msg(43, 100), ReadStatus::default());
        tl.insert_server(msg(44, 300), ReadStatus::default());
        let ids: Vec<u64> = tl.lines().iter().map(|l| l.message.id).collect();
        assert_eq!(ids, vec![43, 44, 45]);
    }

    #[test]
    fn echo_reconciles_in_place_not_as_duplicate() {
        let mut tl = Timeline::new();
        let local = tl.push_local(msg(0, 500), ReadStatus::default());
        assert!(tl.reconcile_local(local, 7, 510, ReadStatus::default()));
        assert_eq!(tl.lines().len(), 1);
        assert_eq!(tl.lines()[0].key, LineKey::Server(7));
        assert!(!tl.lines()[0].pending);
        // 回声再经轮询送达也不再追加 / a later duplicate via polling stays out
        assert!(!tl.insert_server(msg(7, 510), ReadStatus::default()));
    }

    #[test]
    fn latest_cursor_ignores_pending_lines() {
        let mut tl = Timeline::new();
        tl.insert_server(msg(3, 100), ReadStatus::default());
        tl.push_local(msg(0, 900), ReadStatus::default());
        assert_eq!(tl.latest_cursor(), Some(Cursor { at: 100, id: 3 }));
    }
}
