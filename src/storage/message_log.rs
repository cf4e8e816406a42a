use dashmap::DashMap;
use parking_lot::RwLock;

use crate::domain::text::normalize_body;
use crate::domain::{ChatMessage, Cursor, MessageKind, Role};
use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Forward,
    Backward,
}

/// 分页结果，条目总是升序返回 / Page result; items always come back ascending
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<ChatMessage>,
    pub has_more_before: bool,
}

struct RoomLog {
    next_id: u64,
    latest_at: i64,
    items: Vec<ChatMessage>,
}

impl RoomLog {
    fn new() -> Self {
        RoomLog { next_id: 1, latest_at: 0, items: Vec::new() }
    }
}

/// 追加式消息日志，每房间一份 / Append-only message log, one per room
///
/// append 是唯一的写路径，在房间写锁内分配下一个单调 id。
/// `append` is the only mutation path; the next monotonic id is assigned
/// under the room's write lock.
pub struct MessageLog {
    rooms: DashMap<String, RwLock<RoomLog>>,
}

impl MessageLog {
    pub fn new() -> Self {
        MessageLog { rooms: DashMap::new() }
    }

    pub fn append(
        &self,
        room_id: &str,
        author_id: &str,
        author_display: &str,
        author_role: Role,
        kind: MessageKind,
        raw_body: &str,
        now: i64,
    ) -> Result<ChatMessage, ChatError> {
        let body = normalize_body(raw_body);
        if body.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let entry = self.rooms.entry(room_id.to_string()).or_insert_with(|| RwLock::new(RoomLog::new()));
        let mut log = entry.write();
        // 时钟可以倒退，排序不能：同毫秒由 id 决胜
        // The clock may step back; the ordering may not: same-millisecond
        // rows resolve by id
        let at = now.max(log.latest_at);
        let msg = ChatMessage {
            id: log.next_id,
            room_id: room_id.to_string(),
            author_id: author_id.to_string(),
            author_display: author_display.to_string(),
            author_role,
            body,
            kind,
            created_at: at,
        };
        log.next_id += 1;
        log.latest_at = at;
        log.items.push(msg.clone());
        Ok(msg)
    }

    pub fn page(
        &self,
        room_id: &str,
        anchor: Option<Cursor>,
        limit: usize,
        direction: PageDirection,
    ) -> Page {
        let Some(entry) = self.rooms.get(room_id) else {
            return Page { items: Vec::new(), has_more_before: false };
        };
        let log = entry.read();
        match direction {
            PageDirection::Forward => {
                let items = log
                    .items
                    .iter()
                    .filter(|m| anchor.map_or(true, |a| a.is_before(m)))
                    .take(limit)
                    .cloned()
                    .collect();
                Page { items, has_more_before: false }
            }
            PageDirection::Backward => {
                // 多取一行探测是否还有更早历史，然后翻回升序
                // Probe one extra row for older history, then flip ascending
                let mut items: Vec<ChatMessage> = log
                    .items
                    .iter()
                    .rev()
                    .filter(|m| anchor.map_or(true, |a| a.is_after(m)))
                    .take(limit + 1)
                    .cloned()
                    .collect();
                let has_more_before = items.len() > limit;
                items.truncate(limit);
                items.reverse();
                Page { items, has_more_before }
            }
        }
    }

    /// 未读计数：账本之后的消息，排除读者自己发的
    /// Unread count: rows newer than the ledger entry, minus the viewer's own
    pub fn count_unread(&self, room_id: &str, since: Option<i64>, viewer_id: &str) -> usize {
        let Some(entry) = self.rooms.get(room_id) else { return 0 };
        let log = entry.read();
        log.items
            .iter()
            .filter(|m| since.map_or(true, |s| m.created_at > s))
            .filter(|m| m.author_id != viewer_id)
            .count()
    }

    pub fn latest_at(&self, room_id: &str) -> Option<i64> {
        self.rooms.get(room_id).and_then(|e| {
            let log = e.read();
            if log.items.is_empty() {
                None
            } else {
                Some(log.latest_at)
            }
        })
    }

    /// 收件箱排序：按最近活动降序 / Inbox ordering: latest activity first
    pub fn rooms_by_recency(&self) -> Vec<(String, i64)> {
        let mut rooms: Vec<(String, i64)> = self
            .rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().read().latest_at))
            .collect();
        rooms.sort_by(|a, b| b.1.cmp(&a.1));
        rooms
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(log: &MessageLog, n: usize) {
        for i in 0..n {
            log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, &format!("m{}", i), 100 + i as i64)
                .unwrap();
        }
    }

    #[test]
    fn append_assigns_monotonic_ids() {
        let log = MessageLog::new();
        let a = log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, "a", 100).unwrap();
        let b = log.append("r1", "u2", "U2", Role::Pm, MessageKind::Text, "b", 100).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(b.created_at >= a.created_at);
    }

    #[test]
    fn append_rejects_empty_after_normalization() {
        let log = MessageLog::new();
        assert!(matches!(
            log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, "<p> </p>", 100),
            Err(ChatError::EmptyMessage)
        ));
    }

    #[test]
    fn append_never_regresses_created_at() {
        let log = MessageLog::new();
        log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, "a", 200).unwrap();
        let b = log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, "b", 150).unwrap();
        assert_eq!(b.created_at, 200);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn forward_pages_chain_without_gaps_or_duplicates() {
        let log = MessageLog::new();
        seed(&log, 25);
        let mut seen = Vec::new();
        let mut anchor = None;
        loop {
            let page = log.page("r1", anchor, 10, PageDirection::Forward);
            if page.items.is_empty() {
                break;
            }
            anchor = page.items.last().map(Cursor::of);
            seen.extend(page.items.into_iter().map(|m| m.id));
        }
        assert_eq!(seen, (1..=25).collect::<Vec<u64>>());
    }

    #[test]
    fn backward_page_boundary_flags() {
        let log = MessageLog::new();
        seed(&log, 10);
        let page = log.page("r1", None, 10, PageDirection::Backward);
        assert_eq!(page.items.len(), 10);
        assert!(!page.has_more_before);

        log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, "one more", 200).unwrap();
        let page = log.page("r1", None, 10, PageDirection::Backward);
        assert_eq!(page.items.len(), 10);
        assert!(page.has_more_before);
        // 升序返回，最后一条是最新的 / ascending order, newest last
        assert_eq!(page.items.last().unwrap().id, 11);
    }

    #[test]
    fn backward_from_cursor_returns_older_rows() {
        let log = MessageLog::new();
        seed(&log, 5);
        let anchor = Cursor { at: 102, id: 3 };
        let page = log.page("r1", Some(anchor), 10, PageDirection::Backward);
        assert_eq!(page.items.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn unread_excludes_self_authored() {
        let log = MessageLog::new();
        log.append("r1", "u1", "U1", Role::Client, MessageKind::Text, "mine", 100).unwrap();
        log.append("r1", "u2", "U2", Role::Pm, MessageKind::Text, "theirs", 110).unwrap();
        assert_eq!(log.count_unread("r1", None, "u1"), 1);
        assert_eq!(log.count_unread("r1", Some(110), "u1"), 0);
    }

    #[test]
    fn recency_ordering_updates_on_append() {
        let log = MessageLog::new();
        log.append("a", "u1", "U1", Role::Client, MessageKind::Text, "x", 100).unwrap();
        log.append("b", "u1", "U1", Role::Client, MessageKind::Text, "y", 200).unwrap();
        assert_eq!(log.rooms_by_recency()[0].0, "b");
        log.append("a", "u1", "U1", Role::Client, MessageKind::Text, "z", 300).unwrap();
        assert_eq!(log.rooms_by_recency()[0].0, "a");
    }
}
