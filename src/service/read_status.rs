use crate::domain::{ChatMessage, LedgerSnapshot, ReadStatus, Role, RoomParticipants};
use crate::storage::MessageLog;

/// 计算单条消息的角色已读映射 / Compute the per-role read map for one message
///
/// 作者角色对自己的消息恒为已读；无人占用的 client/pm 槽位视作空真已读；
/// admin 槽位从不空真——监督角色必须显式已读。
/// The author's role is always read for its own message; a vacant client/pm
/// slot is vacuously read; the admin slot is never vacuous — the oversight
/// role must read explicitly.
pub fn compute_status(
    message: &ChatMessage,
    ledger: &LedgerSnapshot,
    participants: &RoomParticipants,
) -> ReadStatus {
    let read_for = |role: Role| -> bool {
        if message.author_role == role {
            return true;
        }
        if let Some(at) = ledger.get(role) {
            if at >= message.created_at {
                return true;
            }
        }
        role != Role::Admin && participants.slot(role).is_none()
    };
    ReadStatus {
        client: read_for(Role::Client),
        pm: read_for(Role::Pm),
        admin: read_for(Role::Admin),
    }
}

/// 房间层面的角色已读映射：各角色是否追平最新一条消息
/// Room-level role-read map: has each role caught up to the latest message
pub fn role_read_map(
    latest_at: Option<i64>,
    ledger: &LedgerSnapshot,
    participants: &RoomParticipants,
) -> ReadStatus {
    let Some(latest) = latest_at else {
        // 空房间无可读 / nothing to read in an empty room
        return ReadStatus { client: true, pm: true, admin: true };
    };
    let caught_up = |role: Role| -> bool {
        if ledger.get(role).map_or(false, |at| at >= latest) {
            return true;
        }
        role != Role::Admin && participants.slot(role).is_none()
    };
    ReadStatus {
        client: caught_up(Role::Client),
        pm: caught_up(Role::Pm),
        admin: caught_up(Role::Admin),
    }
}

/// 读者视角的未读数，不把自己发的算进去
/// Viewer-facing unread count; self-authored rows never count
pub fn count_unread(
    log: &MessageLog,
    room_id: &str,
    role: Role,
    viewer_id: &str,
    ledger: &LedgerSnapshot,
) -> usize {
    log.count_unread(room_id, ledger.get(role), viewer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageKind;

    fn msg(author_id: &str, role: Role, at: i64) -> ChatMessage {
        ChatMessage {
            id: 1,
            room_id: "project_7".into(),
            author_id: author_id.into(),
            author_display: author_id.to_uppercase(),
            author_role: role,
            body: "hello".into(),
            kind: MessageKind::Text,
            created_at: at,
        }
    }

    fn both_slots() -> RoomParticipants {
        RoomParticipants {
            room_id: "project_7".into(),
            client_user_id: Some("c1".into()),
            pm_user_id: Some("p1".into()),
        }
    }

    #[test]
    fn author_role_is_always_read() {
        let status = compute_status(&msg("c1", Role::Client, 100), &LedgerSnapshot::default(), &both_slots());
        assert!(status.client);
        assert!(!status.pm);
        assert!(!status.admin);
    }

    #[test]
    fn ledger_timestamp_at_or_after_message_reads_it() {
        let ledger = LedgerSnapshot { pm: Some(150), ..Default::default() };
        let status = compute_status(&msg("c1", Role::Client, 100), &ledger, &both_slots());
        assert!(status.pm);
        let status = compute_status(&msg("c1", Role::Client, 151), &ledger, &both_slots());
        assert!(!status.pm);
    }

    #[test]
    fn vacant_slots_are_vacuous_except_admin() {
        let participants = RoomParticipants { room_id: "project_7".into(), ..Default::default() };
        let status = compute_status(&msg("x", Role::Other, 100), &LedgerSnapshot::default(), &participants);
        assert!(status.client);
        assert!(status.pm);
        assert!(!status.admin);
    }

    #[test]
    fn scenario_client_sends_then_pm_reads() {
        // C1 在 t=100 发 "hello"，P1 在 t=150 已读 / C1 sends at 100, P1 reads at 150
        let m = msg("c1", Role::Client, 100);
        let before = compute_status(&m, &LedgerSnapshot::default(), &both_slots());
        assert_eq!(before, ReadStatus { client: true, pm: false, admin: false });
        let ledger = LedgerSnapshot { pm: Some(150), ..Default::default() };
        let after = compute_status(&m, &ledger, &both_slots());
        assert_eq!(after, ReadStatus { client: true, pm: true, admin: false });
    }

    #[test]
    fn empty_room_role_map_is_all_read() {
        let map = role_read_map(None, &LedgerSnapshot::default(), &both_slots());
        assert_eq!(map, ReadStatus { client: true, pm: true, admin: true });
    }
}
