use actix_web::http::StatusCode;

/// 错误分类 / Error taxonomy
///
/// 账本的过期写入不在此列：那是静默空操作，返回当前快照。
/// Stale ledger writes are absent on purpose: those are silent no-ops that
/// return the current snapshot.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// 规范化后正文为空，发起网络请求前本地拒绝
    /// Body empty after normalization, rejected before any network call
    #[error("message body is empty")]
    EmptyMessage,

    /// 访问检查失败，不产生任何部分状态
    /// Access check failed; no partial state mutation
    #[error("not allowed")]
    Forbidden,

    /// 实时通道建立失败或凭证无效，自动回退轮询
    /// Realtime attach failed or credential invalid; poller takes over
    #[error("realtime transport unavailable: {0}")]
    TransportUnavailable(String),

    /// 瞬时网络失败，由调用方的下一次动作重试
    /// Transient network failure, retried by the caller's next action
    #[error("network error: {0}")]
    Network(String),

    /// 房间缺失或无凭证可用，整个房间视图降级为错误态
    /// Missing room or no capability at all; the room view degrades
    #[error("unknown room: {0}")]
    MissingRoom(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::TransportUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Network(_) => StatusCode::BAD_GATEWAY,
            ChatError::MissingRoom(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Network(e.to_string())
    }
}
