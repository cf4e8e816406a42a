use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::domain::{Role, RoomParticipants};

/// 访问控制协作方 / Access-control collaborator
///
/// 鉴权策略在引擎之外，这里只消费结果。凭证的签发同样是外部职责，
/// 引擎只在实时握手时请求校验。
/// Authorization policy lives outside the engine; this trait only consumes
/// it. Credential issuance is external too — the engine merely asks for
/// validation during the realtime handshake.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn can_access(&self, user_id: &str, room_id: &str) -> bool;
    async fn role_of(&self, user_id: &str, room_id: &str) -> Role;
    async fn participants_of(&self, room_id: &str) -> Option<RoomParticipants>;
    async fn check_token(&self, token: &str) -> bool;
    async fn display_name(&self, user_id: &str) -> String;
}

/// 配置驱动的默认实现 / Config-backed default implementation
///
/// admin 能力优先于槽位匹配；client/pm 按槽位判定；其余为 other。
/// Admin capability wins over slot matches; client/pm resolve by slot;
/// everyone else is `other`.
pub struct StaticAccess {
    admins: DashSet<String>,
    rooms: DashMap<String, RoomParticipants>,
    names: DashMap<String, String>,
    token_required: bool,
}

impl StaticAccess {
    pub fn new(token_required: bool) -> Self {
        StaticAccess {
            admins: DashSet::new(),
            rooms: DashMap::new(),
            names: DashMap::new(),
            token_required,
        }
    }

    pub fn grant_admin(&self, user_id: &str) {
        self.admins.insert(user_id.to_string());
    }

    pub fn insert_room(&self, participants: RoomParticipants) {
        self.rooms.insert(participants.room_id.clone(), participants);
    }

    pub fn set_display_name(&self, user_id: &str, name: &str) {
        self.names.insert(user_id.to_string(), name.to_string());
    }
}

#[async_trait]
impl AccessControl for StaticAccess {
    async fn can_access(&self, user_id: &str, room_id: &str) -> bool {
        if user_id.is_empty() {
            return false;
        }
        if self.admins.contains(user_id) {
            return true;
        }
        self.rooms
            .get(room_id)
            .map(|p| {
                p.client_user_id.as_deref() == Some(user_id)
                    || p.pm_user_id.as_deref() == Some(user_id)
            })
            .unwrap_or(false)
    }

    async fn role_of(&self, user_id: &str, room_id: &str) -> Role {
        if user_id.is_empty() {
            return Role::Other;
        }
        if self.admins.contains(user_id) {
            return Role::Admin;
        }
        match self.rooms.get(room_id) {
            Some(p) if p.client_user_id.as_deref() == Some(user_id) => Role::Client,
            Some(p) if p.pm_user_id.as_deref() == Some(user_id) => Role::Pm,
            _ => Role::Other,
        }
    }

    async fn participants_of(&self, room_id: &str) -> Option<RoomParticipants> {
        self.rooms.get(room_id).map(|p| p.clone())
    }

    async fn check_token(&self, token: &str) -> bool {
        // 未开启校验时放行测试令牌 / Allow test tokens when validation is off
        if !self.token_required {
            return true;
        }
        !token.is_empty()
    }

    async fn display_name(&self, user_id: &str) -> String {
        self.names
            .get(user_id)
            .map(|n| n.clone())
            .unwrap_or_else(|| format!("User {}", user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl() -> StaticAccess {
        let acl = StaticAccess::new(false);
        acl.grant_admin("a1");
        acl.insert_room(RoomParticipants {
            room_id: "project_7".into(),
            client_user_id: Some("c1".into()),
            pm_user_id: Some("p1".into()),
        });
        acl
    }

    #[tokio::test]
    async fn admin_capability_wins_over_slots() {
        let acl = acl();
        acl.insert_room(RoomParticipants {
            room_id: "project_8".into(),
            client_user_id: Some("a1".into()),
            pm_user_id: None,
        });
        assert_eq!(acl.role_of("a1", "project_8").await, Role::Admin);
    }

    #[tokio::test]
    async fn slots_resolve_roles_and_access() {
        let acl = acl();
        assert_eq!(acl.role_of("c1", "project_7").await, Role::Client);
        assert_eq!(acl.role_of("p1", "project_7").await, Role::Pm);
        assert_eq!(acl.role_of("nobody", "project_7").await, Role::Other);
        assert!(acl.can_access("c1", "project_7").await);
        assert!(!acl.can_access("nobody", "project_7").await);
        assert!(acl.can_access("a1", "project_7").await);
    }
}
