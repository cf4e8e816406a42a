use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::text::normalize_body;

const ECHO_TTL_MS: i64 = 5_000;

/// 本地发送的内容指纹 / Content fingerprint of a local send
pub fn fingerprint(room_id: &str, author_id: &str, body: &str) -> String {
    format!("{}|{}|{}", room_id, author_id, normalize_body(body))
}

/// 回声抑制缓存 / Echo suppression cache
///
/// 发送方在网络往返完成前登记指纹；命中未过期条目的实时事件被当作
/// 乐观本地行的权威回声而非新消息。条目在每次检查时惰性清扫以约束内存。
/// The sender records a fingerprint before the round-trip completes; a
/// realtime event matching an unexpired entry is the authoritative echo of
/// the optimistic local line, not a new message. Entries are swept lazily
/// on every check to bound memory.
pub struct EchoGuard {
    entries: Mutex<HashMap<String, i64>>,
    ttl_ms: i64,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::with_ttl(ECHO_TTL_MS)
    }

    pub fn with_ttl(ttl_ms: i64) -> Self {
        EchoGuard { entries: Mutex::new(HashMap::new()), ttl_ms }
    }

    pub fn record(&self, fp: String, now: i64) {
        self.entries.lock().insert(fp, now);
    }

    /// 命中即消费：一次登记只吸收一条回声
    /// A hit consumes the entry: one record absorbs exactly one echo
    pub fn check(&self, fp: &str, now: i64) -> bool {
        let mut entries = self.entries.lock();
        let ttl = self.ttl_ms;
        entries.retain(|_, recorded| now - *recorded <= ttl);
        entries.remove(fp).is_some()
    }
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new()
    }
}
