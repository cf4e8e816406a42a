use chrono::NaiveDateTime;
use serde_json::Value;

use crate::domain::{LedgerSnapshot, Role};

// 生产端的负载字段历经多个版本，消费端必须在不知道对方版本的情况下
// 全部容忍。每个规范字段一张按优先级排列的别名表。
// Producer payload shapes went through several versions; the consumer must
// tolerate all of them without knowing which one a sender used. One
// priority-ordered alias table per canonical field.
const ROOM_KEYS: &[&str] = &["room_id", "roomId", "room", "project_id", "project", "pid", "channel"];
const TYPE_KEYS: &[&str] = &["type", "name", "kind", "event"];
const ID_KEYS: &[&str] = &["id", "message_id", "msg_id"];
const AUTHOR_KEYS: &[&str] = &["user", "user_id", "author_id", "uid", "from", "sender"];
const DISPLAY_KEYS: &[&str] = &["user_display", "display_name", "author_name", "name"];
const ROLE_KEYS: &[&str] = &["role", "author_role", "user_role"];
const BODY_KEYS: &[&str] = &["message", "body", "content", "text"];
const AT_KEYS: &[&str] = &["at", "created_at", "timestamp", "ts", "published_at"];
const READS_KEYS: &[&str] = &["reads", "read_by", "receipts", "read"];
const LEDGER_KEYS: &[&str] = &["ledger", "read_ledger", "last_read"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Text,
    System,
    ReadReceipt,
}

/// 谁读过的信号，四种历史形态合并后的规范结构
/// "Who has read this" signals, merged from the four historical shapes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSignals {
    pub client: Option<bool>,
    pub pm: Option<bool>,
    pub admin: Option<bool>,
    pub users: Vec<String>,
}

impl ReadSignals {
    pub fn is_empty(&self) -> bool {
        self.client.is_none() && self.pm.is_none() && self.admin.is_none() && self.users.is_empty()
    }

    fn set(&mut self, role: Role, value: bool) {
        match role {
            Role::Client => self.client = Some(value),
            Role::Pm => self.pm = Some(value),
            Role::Admin => self.admin = Some(value),
            _ => {}
        }
    }
}

/// 规范化后的传输事件 / Canonical transport event
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub kind: EventKind,
    pub room_id: String,
    pub message_id: Option<u64>,
    pub author_id: Option<String>,
    pub author_display: Option<String>,
    pub role: Role,
    pub body: String,
    pub at: Option<i64>,
    pub reads: ReadSignals,
    pub ledger: Option<LedgerSnapshot>,
}

// 逐层查找：信封顶层优先，其次 data / payload 一层嵌套
// Layered lookup: envelope top level first, then one nesting level under
// data / payload
fn find<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let layers = [Some(raw), raw.get("data"), raw.get("payload")];
    for key in keys {
        for layer in layers.iter().flatten() {
            if let Some(v) = layer.get(key) {
                if !v.is_null() {
                    return Some(v);
                }
            }
        }
    }
    None
}

// 字符串或数字都接受成字符串 / Accept strings and numbers as strings
fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_i64().unwrap_or(0) != 0),
        Value::String(s) => match s.as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// 毫秒整数、RFC3339 或 "Y-m-d H:M:S"（旧版持久层格式）
// Millisecond ints, RFC3339, or "Y-m-d H:M:S" (the legacy store format)
fn as_timestamp(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

fn resolve_kind(raw: &Value) -> EventKind {
    let label = find(raw, TYPE_KEYS).and_then(as_string).unwrap_or_default();
    match label.as_str() {
        "system" | "sys" => EventKind::System,
        "read_receipt" | "receipt" | "message_read" => EventKind::ReadReceipt,
        _ => EventKind::Text,
    }
}

fn resolve_role(raw: &Value, kind: EventKind) -> Role {
    let fallback = if kind == EventKind::System { Role::Sys } else { Role::Other };
    find(raw, ROLE_KEYS)
        .and_then(as_string)
        .and_then(|s| Role::from_label(&s))
        .unwrap_or(fallback)
}

// 读信号的四种历史形态：平铺布尔、角色映射、用户ID数组、{role,value} 对数组
// The four historical read-signal shapes: flat booleans, role maps,
// user-id arrays, arrays of {role, value} pairs
fn collect_reads(raw: &Value) -> ReadSignals {
    let mut signals = ReadSignals::default();

    for (role, flat_keys) in [
        (Role::Client, ["client_read", "read_client"]),
        (Role::Pm, ["pm_read", "read_pm"]),
        (Role::Admin, ["admin_read", "read_admin"]),
    ] {
        if let Some(v) = find(raw, &flat_keys).and_then(as_bool) {
            signals.set(role, v);
        }
    }

    let Some(container) = find(raw, READS_KEYS) else { return signals };
    match container {
        Value::Object(map) => {
            for (key, value) in map {
                if let Some(role) = Role::from_label(key) {
                    if let Some(v) = as_bool(value) {
                        signals.set(role, v);
                    }
                } else if key == "users" {
                    if let Value::Array(users) = value {
                        signals.users.extend(users.iter().filter_map(as_string));
                    }
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                match entry {
                    Value::Object(pair) => {
                        let role = pair
                            .get("role")
                            .and_then(as_string)
                            .and_then(|s| Role::from_label(&s));
                        let value = pair
                            .get("value")
                            .or_else(|| pair.get("read"))
                            .or_else(|| pair.get("seen"))
                            .and_then(as_bool);
                        match (role, value) {
                            (Some(role), Some(v)) => signals.set(role, v),
                            _ => {
                                if let Some(user) =
                                    pair.get("user").or_else(|| pair.get("user_id")).and_then(as_string)
                                {
                                    signals.users.push(user);
                                }
                            }
                        }
                    }
                    other => {
                        if let Some(user) = as_string(other) {
                            signals.users.push(user);
                        }
                    }
                }
            }
        }
        _ => {}
    }
    signals
}

fn collect_ledger(raw: &Value) -> Option<LedgerSnapshot> {
    let container = find(raw, LEDGER_KEYS)?;
    let map = container.as_object()?;
    let pick = |key: &str| map.get(key).and_then(as_timestamp);
    Some(LedgerSnapshot { client: pick("client"), pm: pick("pm"), admin: pick("admin") })
}

/// 规范化任意形态的传输事件；全函数，从不失败
/// Normalize a transport event of any shape; total, never fails
///
/// 房间按别名表解析，兜底用订阅自身的房间上下文。
/// The room resolves through the alias table, falling back to the
/// subscription's own room context.
pub fn normalize(raw: &Value, fallback_room_id: &str) -> CanonicalEvent {
    let kind = resolve_kind(raw);
    CanonicalEvent {
        kind,
        room_id: find(raw, ROOM_KEYS)
            .and_then(as_string)
            .unwrap_or_else(|| fallback_room_id.to_string()),
        message_id: find(raw, ID_KEYS).and_then(|v| v.as_u64()),
        author_id: find(raw, AUTHOR_KEYS).and_then(as_string),
        author_display: find(raw, DISPLAY_KEYS).and_then(as_string),
        role: resolve_role(raw, kind),
        body: find(raw, BODY_KEYS).and_then(as_string).unwrap_or_default(),
        at: find(raw, AT_KEYS).and_then(as_timestamp),
        reads: collect_reads(raw),
        ledger: collect_ledger(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_wire_shape_resolves_all_fields() {
        let raw = json!({
            "type": "text",
            "room_id": "project_7",
            "data": {
                "id": 42,
                "message": "hello",
                "user": "c1",
                "user_display": "Cleo",
                "role": "client",
                "at": 1000
            }
        });
        let ev = normalize(&raw, "fallback");
        assert_eq!(ev.kind, EventKind::Text);
        assert_eq!(ev.room_id, "project_7");
        assert_eq!(ev.message_id, Some(42));
        assert_eq!(ev.author_id.as_deref(), Some("c1"));
        assert_eq!(ev.role, Role::Client);
        assert_eq!(ev.body, "hello");
        assert_eq!(ev.at, Some(1000));
    }

    #[test]
    fn legacy_flat_shape_with_numeric_user_and_project_key() {
        let raw = json!({
            "type": "text",
            "message": "hi",
            "project": 7,
            "user": 31,
            "at": "2024-03-01 10:00:00"
        });
        let ev = normalize(&raw, "fallback");
        assert_eq!(ev.room_id, "7");
        assert_eq!(ev.author_id.as_deref(), Some("31"));
        assert!(ev.at.is_some());
    }

    #[test]
    fn missing_room_falls_back_to_subscription_context() {
        let ev = normalize(&json!({"message": "x"}), "project_9");
        assert_eq!(ev.room_id, "project_9");
        assert_eq!(ev.kind, EventKind::Text);
    }

    #[test]
    fn unknown_role_defaults_by_kind() {
        let text = normalize(&json!({"type": "text", "role": "superuser"}), "r");
        assert_eq!(text.role, Role::Other);
        let sys = normalize(&json!({"type": "system", "role": "superuser"}), "r");
        assert_eq!(sys.role, Role::Sys);
        let none = normalize(&json!({"type": "system"}), "r");
        assert_eq!(none.role, Role::Sys);
    }

    #[test]
    fn reads_from_flat_booleans() {
        let ev = normalize(&json!({"type": "read_receipt", "client_read": true, "read_pm": 0}), "r");
        assert_eq!(ev.reads.client, Some(true));
        assert_eq!(ev.reads.pm, Some(false));
        assert_eq!(ev.reads.admin, None);
    }

    #[test]
    fn reads_from_nested_role_map() {
        let ev = normalize(
            &json!({"type": "read_receipt", "data": {"reads": {"client": true, "pm": "1", "users": [5, "6"]}}}),
            "r",
        );
        assert_eq!(ev.reads.client, Some(true));
        assert_eq!(ev.reads.pm, Some(true));
        assert_eq!(ev.reads.users, vec!["5", "6"]);
    }

    #[test]
    fn reads_from_user_id_array() {
        let ev = normalize(&json!({"read_by": [1, 2, "u3"]}), "r");
        assert_eq!(ev.reads.users, vec!["1", "2", "u3"]);
    }

    #[test]
    fn reads_from_role_value_pairs() {
        let ev = normalize(
            &json!({"receipts": [{"role": "pm", "value": true}, {"role": "admin", "read": false}, {"user_id": 9}]}),
            "r",
        );
        assert_eq!(ev.reads.pm, Some(true));
        assert_eq!(ev.reads.admin, Some(false));
        assert_eq!(ev.reads.users, vec!["9"]);
    }

    #[test]
    fn receipt_carries_ledger_snapshot() {
        let ev = normalize(
            &json!({"type": "read_receipt", "data": {"role": "pm", "at": 150, "ledger": {"client": 100, "pm": 150}}}),
            "r",
        );
        assert_eq!(ev.kind, EventKind::ReadReceipt);
        assert_eq!(ev.role, Role::Pm);
        assert_eq!(ev.ledger, Some(LedgerSnapshot { client: Some(100), pm: Some(150), admin: None }));
    }

    #[test]
    fn garbage_input_still_normalizes() {
        let ev = normalize(&json!("not even an object"), "project_1");
        assert_eq!(ev.kind, EventKind::Text);
        assert_eq!(ev.room_id, "project_1");
        assert!(ev.body.is_empty());
        assert!(ev.reads.is_empty());
    }
}
