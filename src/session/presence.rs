use std::collections::HashMap;

use serde_json::Value;

/// 输入状态参数 / Typing presence tuning
#[derive(Debug, Clone, Copy)]
pub struct PresenceTuning {
    pub idle_ms: i64,
    pub stale_ms: i64,
    pub sweep_ms: i64,
    pub resync_backoff_ms: i64,
}

impl Default for PresenceTuning {
    fn default() -> Self {
        PresenceTuning { idle_ms: 3_000, stale_ms: 5_000, sweep_ms: 1_500, resync_backoff_ms: 200 }
    }
}

/// 输入状态发布器：单飞 + 完成时对账
/// Typing publisher: single flight with resync-on-completion
///
/// 期望态随输入/失焦/发送翻转；同步在途时新期望只置脏标记，完成后对账，
/// 失败经短退避重同步。任何时刻最多一个在途更新。
/// Desired state flips on input/blur/send; while a sync is in flight a new
/// desire only marks dirty and is reconciled on completion, failures resync
/// after a short backoff. At most one update is ever in flight.
pub struct TypingPublisher {
    tuning: PresenceTuning,
    synced: bool,
    desired: bool,
    in_flight: Option<bool>,
    resync_at: Option<i64>,
    idle_deadline: Option<i64>,
}

impl TypingPublisher {
    pub fn new(tuning: PresenceTuning) -> Self {
        TypingPublisher {
            tuning,
            synced: false,
            desired: false,
            in_flight: None,
            resync_at: None,
            idle_deadline: None,
        }
    }

    /// 返回 Some(state) 表示现在就发布这个状态
    /// Some(state) means: publish exactly this state now
    fn try_sync(&mut self, now: i64) -> Option<bool> {
        if self.in_flight.is_some() {
            if self.resync_at.is_none() {
                self.resync_at = Some(now + self.tuning.resync_backoff_ms);
            }
            return None;
        }
        if self.synced == self.desired {
            return None;
        }
        self.in_flight = Some(self.desired);
        Some(self.desired)
    }

    pub fn on_input(&mut self, now: i64) -> Option<bool> {
        self.desired = true;
        self.idle_deadline = Some(now + self.tuning.idle_ms);
        self.try_sync(now)
    }

    pub fn on_blur(&mut self, now: i64) -> Option<bool> {
        self.desired = false;
        self.idle_deadline = None;
        self.try_sync(now)
    }

    pub fn on_send(&mut self, now: i64) -> Option<bool> {
        self.on_blur(now)
    }

    /// 在途更新落地 / The in-flight update completed
    pub fn complete(&mut self, ok: bool, now: i64) -> Option<bool> {
        let Some(sent) = self.in_flight.take() else { return None };
        if ok {
            self.synced = sent;
        } else {
            self.resync_at = Some(now + self.tuning.resync_backoff_ms);
            return None;
        }
        self.try_sync(now)
    }

    /// 节拍：空闲超时回落、退避重同步
    /// Tick: idle timeout falls back to false, backoff resyncs fire
    pub fn tick(&mut self, now: i64) -> Option<bool> {
        let mut due = false;
        if let Some(deadline) = self.idle_deadline {
            if now >= deadline {
                self.idle_deadline = None;
                self.desired = false;
                due = true;
            }
        }
        if let Some(at) = self.resync_at {
            if now >= at {
                self.resync_at = None;
                due = true;
            }
        }
        if due {
            self.try_sync(now)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub name: String,
    pub updated_at: i64,
}

/// 远端输入状态聚合 / Remote typing aggregation
///
/// 键优先取稳定连接 id（同一用户多端不相撞），退而求其次用客户端 id。
/// 周期清扫兜底丢失的 "stopped typing"（如硬断连）。
/// Keys prefer the stable connection id (multiple sessions of one user do
/// not collide), then the reusable client id. The periodic sweep self-heals
/// missed "stopped typing" signals (e.g. abrupt disconnects).
pub struct PresenceRoster {
    own_conn_id: String,
    own_user_id: String,
    stale_ms: i64,
    entries: HashMap<String, RosterEntry>,
}

impl PresenceRoster {
    pub fn new(own_conn_id: &str, own_user_id: &str, stale_ms: i64) -> Self {
        PresenceRoster {
            own_conn_id: own_conn_id.to_string(),
            own_user_id: own_user_id.to_string(),
            stale_ms,
            entries: HashMap::new(),
        }
    }

    fn presence_key(data: &Value) -> Option<String> {
        if let Some(conn) = data
            .get("conn")
            .or_else(|| data.get("connectionId"))
            .and_then(|v| v.as_str())
        {
            return Some(format!("conn:{}", conn));
        }
        if let Some(client) = data
            .get("user")
            .or_else(|| data.get("clientId"))
            .or_else(|| data.get("client_id"))
            .and_then(|v| v.as_str())
        {
            return Some(format!("client:{}", client));
        }
        data.get("id").and_then(|v| v.as_str()).map(|id| format!("id:{}", id))
    }

    fn is_own(&self, data: &Value) -> bool {
        match data.get("conn").or_else(|| data.get("connectionId")).and_then(|v| v.as_str()) {
            Some(conn) => conn == self.own_conn_id,
            // 没有连接 id 时只能按用户 id 比对 / without a connection id the
            // user id is the only comparison left
            None => data
                .get("user")
                .or_else(|| data.get("clientId"))
                .and_then(|v| v.as_str())
                .map(|u| u == self.own_user_id)
                .unwrap_or(false),
        }
    }

    /// 应用一条存在事件的 data 部分；返回指示器是否需要刷新
    /// Apply one presence event's data part; returns whether the indicator
    /// changed
    pub fn apply(&mut self, data: &Value, now: i64) -> bool {
        if self.is_own(data) {
            return false;
        }
        let Some(key) = Self::presence_key(data) else { return false };
        let typing = data.get("typing").and_then(|v| v.as_bool()).unwrap_or(false);
        if typing {
            let name = data
                .get("name")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("Someone")
                .to_string();
            self.entries.insert(key, RosterEntry { name, updated_at: now });
            true
        } else {
            self.entries.remove(&key).is_some()
        }
    }

    /// 清扫过期条目 / Evict stale entries
    pub fn prune(&mut self, now: i64) -> bool {
        let before = self.entries.len();
        let stale = self.stale_ms;
        self.entries.retain(|_, e| now - e.updated_at <= stale);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 正在输入的显示名，去重 / Typing display names, deduplicated
    pub fn typing_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.entries.values() {
            if !names.contains(&entry.name) {
                names.push(entry.name.clone());
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_flight_never_races_two_updates() {
        let mut t = TypingPublisher::new(PresenceTuning::default());
        assert_eq!(t.on_input(1_000), Some(true));
        // 在途期间的新期望不触发第二个更新 / a new desire mid-flight must
        // not start a second update
        assert_eq!(t.on_blur(1_050), None);
        assert_eq!(t.on_input(1_100), None);
        // 完成后对账到最终期望 / completion reconciles to the final desire
        assert_eq!(t.complete(true, 1_200), None);
        assert_eq!(t.tick(1_300), None);
    }

    #[test]
    fn completion_syncs_trailing_desire() {
        let mut t = TypingPublisher::new(PresenceTuning::default());
        assert_eq!(t.on_input(1_000), Some(true));
        assert_eq!(t.on_blur(1_050), None);
        assert_eq!(t.complete(true, 1_300), Some(false));
        assert_eq!(t.complete(true, 1_400), None);
    }

    #[test]
    fn failed_sync_retries_after_backoff() {
        let mut t = TypingPublisher::new(PresenceTuning::default());
        assert_eq!(t.on_input(1_000), Some(true));
        assert_eq!(t.complete(false, 1_100), None);
        assert_eq!(t.tick(1_250), None);
        assert_eq!(t.tick(1_300), Some(true));
    }

    #[test]
    fn idle_timeout_falls_back_to_not_typing() {
        let mut t = TypingPublisher::new(PresenceTuning::default());
        assert_eq!(t.on_input(1_000), Some(true));
        assert_eq!(t.complete(true, 1_100), None);
        assert_eq!(t.tick(3_900), None);
        assert_eq!(t.tick(4_000), Some(false));
    }

    #[test]
    fn roster_ignores_own_connection() {
        let mut r = PresenceRoster::new("conn-1", "u1", 5_000);
        assert!(!r.apply(&json!({"conn": "conn-1", "user": "u1", "typing": true, "name": "Me"}), 100));
        // 无连接 id 时退化到用户 id 比对 / falls back to the user id
        assert!(!r.apply(&json!({"user": "u1", "typing": true, "name": "Me"}), 100));
        assert!(r.typing_names().is_empty());
    }

    #[test]
    fn two_sessions_of_one_user_do_not_collide() {
        let mut r = PresenceRoster::new("conn-1", "u1", 5_000);
        r.apply(&json!({"conn": "conn-2", "user": "u2", "typing": true, "name": "Ann"}), 100);
        r.apply(&json!({"conn": "conn-3", "user": "u2", "typing": true, "name": "Ann"}), 150);
        assert_eq!(r.typing_names(), vec!["Ann"]);
        // 一端停止输入，另一端仍在 / one session stops, the other remains
        r.apply(&json!({"conn": "conn-2", "user": "u2", "typing": false}), 200);
        assert_eq!(r.typing_names(), vec!["Ann"]);
    }

    #[test]
    fn sweep_self_heals_missed_stop_signals() {
        let mut r = PresenceRoster::new("conn-1", "u1", 5_000);
        r.apply(&json!({"conn": "conn-2", "typing": true, "name": "Ann"}), 1_000);
        assert!(!r.prune(5_900));
        assert!(r.prune(6_100));
        assert!(r.typing_names().is_empty());
    }

    #[test]
    fn blank_names_render_as_someone() {
        let mut r = PresenceRoster::new("conn-1", "u1", 5_000);
        r.apply(&json!({"conn": "conn-2", "typing": true, "name": "  "}), 100);
        assert_eq!(r.typing_names(), vec!["Someone"]);
    }
}
