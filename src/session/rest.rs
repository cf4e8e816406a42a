use std::time::Duration;

use serde_json::json;

use crate::domain::Cursor;
use crate::error::ChatError;
use crate::server::{HistoryOutcome, MarkReadOutcome, SendOutcome};

const REQUEST_TIMEOUT_MS: u64 = 10_000;

/// 会话侧 REST 客户端 / Session-side REST client
///
/// 发送/历史/标记已读三条网络路径都是异步非阻塞的；瞬时失败由调用方的
/// 下一次动作重试，这里不做无界重试。
/// The send/history/mark-read network paths are async and non-blocking;
/// transient failures are retried by the caller's next action, never by an
/// unbounded loop here.
pub struct RestClient {
    http: reqwest::Client,
    base: String,
}

impl RestClient {
    pub fn new(base: &str) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .map_err(|e| ChatError::Network(e.to_string()))?;
        Ok(RestClient { http, base: base.trim_end_matches('/').to_string() })
    }

    fn classify(status: reqwest::StatusCode) -> ChatError {
        match status.as_u16() {
            400 => ChatError::EmptyMessage,
            403 => ChatError::Forbidden,
            404 => ChatError::MissingRoom("room not found".to_string()),
            code => ChatError::Network(format!("unexpected status {}", code)),
        }
    }

    pub async fn send(&self, uid: &str, room_id: &str, content: &str) -> Result<SendOutcome, ChatError> {
        let resp = self
            .http
            .post(format!("{}/v1/message/send", self.base))
            .json(&json!({ "uid": uid, "room_id": room_id, "content": content }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn history(
        &self,
        uid: &str,
        room_id: &str,
        limit: Option<usize>,
        after: Option<Cursor>,
    ) -> Result<HistoryOutcome, ChatError> {
        let mut query: Vec<(String, String)> = vec![
            ("uid".into(), uid.to_string()),
            ("room_id".into(), room_id.to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit".into(), limit.to_string()));
        }
        if let Some(cursor) = after {
            query.push(("after_at".into(), cursor.at.to_string()));
            query.push(("after_id".into(), cursor.id.to_string()));
        }
        let resp = self
            .http
            .get(format!("{}/v1/message/history", self.base))
            .query(&query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn mark_read(&self, uid: &str, room_id: &str) -> Result<MarkReadOutcome, ChatError> {
        let resp = self
            .http
            .post(format!("{}/v1/message/read", self.base))
            .json(&json!({ "uid": uid, "room_id": room_id }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify(resp.status()));
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_its_trailing_slash() {
        let client = RestClient::new("http://127.0.0.1:8090/").unwrap();
        assert_eq!(client.base, "http://127.0.0.1:8090");
    }

    #[test]
    fn status_codes_map_onto_the_error_taxonomy() {
        assert!(matches!(
            RestClient::classify(reqwest::StatusCode::BAD_REQUEST),
            ChatError::EmptyMessage
        ));
        assert!(matches!(
            RestClient::classify(reqwest::StatusCode::FORBIDDEN),
            ChatError::Forbidden
        ));
        assert!(matches!(
            RestClient::classify(reqwest::StatusCode::NOT_FOUND),
            ChatError::MissingRoom(_)
        ));
        assert!(matches!(
            RestClient::classify(reqwest::StatusCode::BAD_GATEWAY),
            ChatError::Network(_)
        ));
    }
}
