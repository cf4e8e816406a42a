use dashmap::DashMap;
use parking_lot::RwLock;

use crate::domain::{LedgerSnapshot, Role};
use crate::error::ChatError;

/// 已读账本 / Read ledger
///
/// 每房间一份快照，条目在首次已读事件时惰性创建。写入按值比较单调接受，
/// 因此同角色多端并发写彼此可交换，数值大者胜，与到达顺序无关。
/// One snapshot per room; entries are created lazily on the first read
/// event. Writes are accepted by strictly-greater value comparison, so
/// concurrent writers of one role commute: the larger timestamp wins
/// regardless of arrival order.
pub struct ReadLedger {
    rooms: DashMap<String, RwLock<LedgerSnapshot>>,
}

impl ReadLedger {
    pub fn new() -> Self {
        ReadLedger { rooms: DashMap::new() }
    }

    /// 过期写入不是错误：返回 (false, 当前快照)
    /// A stale write is not an error: returns (false, current snapshot)
    pub fn mark_read(&self, room_id: &str, role: Role, at: i64) -> Result<(bool, LedgerSnapshot), ChatError> {
        if !role.is_ledger_role() {
            return Err(ChatError::Forbidden);
        }
        let entry = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RwLock::new(LedgerSnapshot::default()));
        let mut snap = entry.write();
        let updated = snap.advance(role, at);
        Ok((updated, *snap))
    }

    pub fn snapshot(&self, room_id: &str) -> LedgerSnapshot {
        self.rooms.get(room_id).map(|e| *e.read()).unwrap_or_default()
    }
}

impl Default for ReadLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_and_out_of_order_writes_are_noops() {
        let ledger = ReadLedger::new();
        let (updated, _) = ledger.mark_read("r1", Role::Pm, 150).unwrap();
        assert!(updated);
        let (updated, snap) = ledger.mark_read("r1", Role::Pm, 120).unwrap();
        assert!(!updated);
        assert_eq!(snap.pm, Some(150));
        let (updated, snap) = ledger.mark_read("r1", Role::Pm, 150).unwrap();
        assert!(!updated);
        assert_eq!(snap.pm, Some(150));
    }

    #[test]
    fn larger_value_wins_regardless_of_arrival() {
        let ledger = ReadLedger::new();
        ledger.mark_read("r1", Role::Client, 500).unwrap();
        ledger.mark_read("r1", Role::Client, 300).unwrap();
        assert_eq!(ledger.snapshot("r1").client, Some(500));
    }

    #[test]
    fn non_ledger_role_is_rejected() {
        let ledger = ReadLedger::new();
        assert!(matches!(ledger.mark_read("r1", Role::Other, 100), Err(ChatError::Forbidden)));
    }

    #[test]
    fn rooms_are_independent() {
        let ledger = ReadLedger::new();
        ledger.mark_read("r1", Role::Admin, 100).unwrap();
        assert_eq!(ledger.snapshot("r2"), LedgerSnapshot::default());
    }
}
