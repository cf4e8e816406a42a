//! 客户端会话 - 时间线、可见性已读、输入状态、回退轮询
//! Client session - timeline, read-on-view, typing presence, fallback polling
//!
//! 会话是显式构造的对象（open/close 生命周期），替代环境全局量；
//! 所有组件按需注入。
//! The session is an explicitly constructed object (open/close lifecycle)
//! instead of ambient globals; every collaborator is injected.

pub mod poller;
pub mod presence;
pub mod rest;
pub mod timeline;
pub mod visibility;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::text::normalize_body;
use crate::domain::{
    ChatMessage, Cursor, LedgerSnapshot, MessageKind, PresenceEvent, Role, RoomEvent,
    RoomParticipants,
};
use crate::error::ChatError;
use crate::realtime::{fingerprint, normalize, CanonicalEvent, EchoGuard, EventKind};
use crate::server::{ChatServer, HistoryOutcome, MarkReadOutcome, SendOutcome};
use crate::service::read_status;

use poller::{FallbackPoller, PollTuning};
use presence::{PresenceRoster, PresenceTuning, TypingPublisher};
use rest::RestClient;
use timeline::{Timeline, TimelineLine};
use visibility::{VisibilitySample, VisibilityTracker, VisibilityTuning};

/// 聊天操作接口，便于测试替换 / Chat operations seam for testability
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send(&self, uid: &str, room_id: &str, content: &str) -> Result<SendOutcome, ChatError>;
    async fn history(
        &self,
        uid: &str,
        room_id: &str,
        limit: Option<usize>,
        after: Option<Cursor>,
    ) -> Result<HistoryOutcome, ChatError>;
    async fn mark_read(&self, uid: &str, room_id: &str) -> Result<MarkReadOutcome, ChatError>;
}

#[async_trait]
impl ChatApi for RestClient {
    async fn send(&self, uid: &str, room_id: &str, content: &str) -> Result<SendOutcome, ChatError> {
        RestClient::send(self, uid, room_id, content).await
    }
    async fn history(
        &self,
        uid: &str,
        room_id: &str,
        limit: Option<usize>,
        after: Option<Cursor>,
    ) -> Result<HistoryOutcome, ChatError> {
        RestClient::history(self, uid, room_id, limit, after).await
    }
    async fn mark_read(&self, uid: &str, room_id: &str) -> Result<MarkReadOutcome, ChatError> {
        RestClient::mark_read(self, uid, room_id).await
    }
}

/// 进程内直连，测试与单机部署共用 / In-process direct wiring, shared by tests
/// and single-node deployments
#[async_trait]
impl ChatApi for ChatServer {
    async fn send(&self, uid: &str, room_id: &str, content: &str) -> Result<SendOutcome, ChatError> {
        ChatServer::send_message(self, uid, room_id, content).await
    }
    async fn history(
        &self,
        uid: &str,
        room_id: &str,
        limit: Option<usize>,
        after: Option<Cursor>,
    ) -> Result<HistoryOutcome, ChatError> {
        ChatServer::history(self, uid, room_id, limit, after, None).await
    }
    async fn mark_read(&self, uid: &str, room_id: &str) -> Result<MarkReadOutcome, ChatError> {
        ChatServer::mark_read(self, uid, room_id).await
    }
}

/// 实时传输接口：挂接房间频道、发布事件
/// Realtime transport seam: attach room channels, publish events
///
/// 凭证签发在引擎之外；attach 失败即回退轮询。
/// Credential issuance is external; an attach failure falls back to polling.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn attach(&self, room_id: &str) -> Result<broadcast::Receiver<RoomEvent>, ChatError>;
    async fn publish(&self, event: RoomEvent) -> Result<(), ChatError>;
}

#[async_trait]
impl RealtimeTransport for crate::service::RoomBus {
    async fn attach(&self, room_id: &str) -> Result<broadcast::Receiver<RoomEvent>, ChatError> {
        Ok(self.subscribe(room_id))
    }
    async fn publish(&self, event: RoomEvent) -> Result<(), ChatError> {
        crate::service::RoomBus::publish(self, event);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Viewer {
    pub user_id: String,
    pub display_name: String,
    pub conn_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTuning {
    pub visibility: VisibilityTuning,
    pub presence: PresenceTuning,
    pub poll: PollTuning,
    pub tick_ms: u64,
    pub reattach_ms: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        SessionTuning {
            visibility: VisibilityTuning::default(),
            presence: PresenceTuning::default(),
            poll: PollTuning::default(),
            tick_ms: 100,
            reattach_ms: 4_000,
        }
    }
}

struct RoomState {
    viewer_role: Role,
    participants: RoomParticipants,
    ledger: LedgerSnapshot,
    timeline: Timeline,
    guard: EchoGuard,
    pending_sends: HashMap<String, u64>, // 指纹 -> 本地行键 / fingerprint -> local key
    visibility: VisibilityTracker,
    typing: TypingPublisher,
    roster: PresenceRoster,
    poller: FallbackPoller,
    next_sweep_at: i64,
}

/// 驱动循环收集的后续动作；锁外执行，避免跨 await 持锁
/// Follow-up actions collected by the driver loop; executed outside the
/// lock so none is held across an await
enum FollowUp {
    Flush { room_id: String },
    Typing { room_id: String, typing: bool },
    Poll { room_id: String, cursor: Option<Cursor>, limit: usize },
}

struct SessionShared {
    viewer: Viewer,
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn RealtimeTransport>,
    tuning: SessionTuning,
    rooms: DashMap<String, Mutex<RoomState>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SessionShared {
    fn with_room<T>(&self, room_id: &str, f: impl FnOnce(&mut RoomState) -> T) -> Option<T> {
        self.rooms.get(room_id).map(|entry| f(&mut entry.lock()))
    }

    fn set_live(&self, room_id: &str, live: bool) {
        self.with_room(room_id, |state| {
            if live {
                state.poller.on_transport_up();
            } else {
                state.poller.on_transport_down(now_ms());
                state.roster.clear();
            }
        });
    }

    /// 实时与轮询共用的入口：任意形态 -> 规范化 -> 渲染管线
    /// Shared intake for live and polling paths: any shape -> normalize ->
    /// render pipeline
    fn ingest_wire(&self, room_id: &str, raw: &serde_json::Value) {
        if raw.get("type").and_then(|v| v.as_str()) == Some("presence") {
            let data = raw.get("data").unwrap_or(raw);
            self.with_room(room_id, |state| state.roster.apply(data, now_ms()));
            return;
        }
        let event = normalize(raw, room_id);
        if event.room_id != room_id {
            // 频道与负载不一致时以订阅上下文为准 / the subscription context
            // wins over a mismatched payload
            debug!("⚠️  Event for room {} arrived on channel {}", event.room_id, room_id);
        }
        self.with_room(room_id, |state| apply_event(state, &self.viewer, event));
    }

    fn tick_all(&self, now: i64) -> Vec<FollowUp> {
        let mut follow = Vec::new();
        for entry in self.rooms.iter() {
            let room_id = entry.key().clone();
            let mut state = entry.value().lock();
            if let Some(watermark) = state.visibility.tick(now) {
                advance_optimistic(&mut state, watermark);
            }
            if state.visibility.due_flush(now).is_some() {
                follow.push(FollowUp::Flush { room_id: room_id.clone() });
            }
            if let Some(typing) = state.typing.tick(now) {
                follow.push(FollowUp::Typing { room_id: room_id.clone(), typing });
            }
            if now >= state.next_sweep_at {
                state.next_sweep_at = now + self.tuning.presence.sweep_ms;
                state.roster.prune(now);
            }
            if let Some(cursor) = state.poller.due(now) {
                follow.push(FollowUp::Poll {
                    room_id: room_id.clone(),
                    cursor,
                    limit: state.poller.limit(),
                });
            }
        }
        follow
    }

    async fn run_followups(&self, follow: Vec<FollowUp>) {
        for action in follow {
            match action {
                FollowUp::Flush { room_id } => self.flush_read(&room_id).await,
                FollowUp::Typing { room_id, typing } => self.publish_typing(&room_id, typing).await,
                FollowUp::Poll { room_id, cursor, limit } => self.poll_room(&room_id, cursor, limit).await,
            }
        }
    }

    /// 去抖后的权威已读写入；响应与乐观值单调合并
    /// The debounced authoritative read write; the response merges
    /// monotonically with the optimistic value
    async fn flush_read(&self, room_id: &str) {
        match self.api.mark_read(&self.viewer.user_id, room_id).await {
            Ok(outcome) => {
                self.with_room(room_id, |state| {
                    if state.ledger.merge_newer(&outcome.read_ledger) {
                        let participants = state.participants.clone();
                        let ledger = state.ledger;
                        state.timeline.recompute_reads(&ledger, &participants);
                    }
                });
            }
            // 下一次 seen 迁移会重新排程，这里不自旋重试
            // The next seen transition re-arms the flush; no retry loop here
            Err(e) => warn!("⚠️  mark_read flush failed for room {}: {}", room_id, e),
        }
    }

    async fn publish_typing(&self, room_id: &str, state_to_send: bool) {
        let mut next = Some(state_to_send);
        while let Some(typing) = next {
            let event = RoomEvent::Presence(PresenceEvent {
                room_id: room_id.to_string(),
                conn_id: self.viewer.conn_id.clone(),
                user_id: self.viewer.user_id.clone(),
                name: self.viewer.display_name.clone(),
                typing,
                at: now_ms(),
            });
            let ok = self.transport.publish(event).await.is_ok();
            next = self
                .with_room(room_id, |state| state.typing.complete(ok, now_ms()))
                .flatten();
        }
    }

    /// 一轮追赶：前向翻页并走实时入口回灌
    /// One catch-up round: page forward and re-enter through the live intake
    async fn poll_room(&self, room_id: &str, cursor: Option<Cursor>, limit: usize) {
        let result = self
            .api
            .history(&self.viewer.user_id, room_id, Some(limit), cursor)
            .await;
        match result {
            Ok(outcome) => {
                for item in &outcome.items {
                    let wire = RoomEvent::Message { message: item.message.clone(), read_status: item.reads }
                        .to_wire();
                    self.ingest_wire(room_id, &wire);
                }
                self.with_room(room_id, |state| {
                    if state.ledger.merge_newer(&outcome.read_ledger) {
                        let participants = state.participants.clone();
                        let ledger = state.ledger;
                        state.timeline.recompute_reads(&ledger, &participants);
                    }
                });
            }
            // 轮询失败在下一轮自然重试 / a failed round retries on its next tick
            Err(e) => debug!("Poll for room {} failed: {}", room_id, e),
        }
        self.with_room(room_id, |state| state.poller.complete(now_ms()));
    }
}

/// 乐观推进本地账本并即时重算可见行 / Advance the local ledger optimistically
/// and recompute visible lines at once
fn advance_optimistic(state: &mut RoomState, watermark: i64) {
    if state.ledger.advance(state.viewer_role, watermark) {
        let participants = state.participants.clone();
        let ledger = state.ledger;
        state.timeline.recompute_reads(&ledger, &participants);
    }
}

fn apply_event(state: &mut RoomState, viewer: &Viewer, event: CanonicalEvent) {
    match event.kind {
        EventKind::ReadReceipt => {
            let mut changed = false;
            if let Some(ledger) = event.ledger {
                changed = state.ledger.merge_newer(&ledger);
            } else if let Some(at) = event.at {
                changed = state.ledger.advance(event.role, at);
            }
            if changed {
                let participants = state.participants.clone();
                let ledger = state.ledger;
                state.timeline.recompute_reads(&ledger, &participants);
            }
        }
        EventKind::Text | EventKind::System => {
            let Some(id) = event.message_id else {
                debug!("Dropping transport message without an id in room {}", event.room_id);
                return;
            };
            let author_id = event.author_id.unwrap_or_default();
            let kind = if event.kind == EventKind::System { MessageKind::System } else { MessageKind::Text };
            let at = event.at.unwrap_or_else(now_ms);
            let message = ChatMessage {
                id,
                room_id: event.room_id.clone(),
                author_id: author_id.clone(),
                author_display: event.author_display.unwrap_or_else(|| format!("User {}", author_id)),
                author_role: event.role,
                body: event.body.clone(),
                kind,
                created_at: at,
            };
            let mut reads = read_status::compute_status(&message, &state.ledger, &state.participants);
            if let Some(v) = event.reads.client {
                reads.client = reads.client || v;
            }
            if let Some(v) = event.reads.pm {
                reads.pm = reads.pm || v;
            }
            if let Some(v) = event.reads.admin {
                reads.admin = reads.admin || v;
            }

            let inserted = if author_id == viewer.user_id {
                let fp = fingerprint(&event.room_id, &author_id, &event.body);
                if state.guard.check(&fp, now_ms()) {
                    // 本地乐观行的权威回声：原地转正而非追加
                    // The authoritative echo of the optimistic local line:
                    // reconcile in place instead of appending
                    match state.pending_sends.remove(&fp) {
                        Some(local_key) => state.timeline.reconcile_local(local_key, id, at, reads),
                        None => state.timeline.insert_server(message.clone(), reads),
                    }
                } else {
                    state.timeline.insert_server(message.clone(), reads)
                }
            } else {
                state.timeline.insert_server(message.clone(), reads)
            };

            if inserted {
                let eligible = author_id != viewer.user_id && kind == MessageKind::Text;
                state.visibility.track(id, at, eligible);
            }
            state.poller.advance_cursor(Cursor { at, id });
        }
    }
}

/// 实时会话 / Realtime session
///
/// open 挂接房间集合并拉起后台循环；close 取消未写出的去抖、发出离开
/// 信号并回收任务。
/// `open` attaches the room set and starts the background loops; `close`
/// cancels pending debounced writes, signals leave, and reaps the tasks.
pub struct RealtimeSession {
    shared: Arc<SessionShared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeSession {
    pub async fn open(
        viewer: Viewer,
        room_ids: &[String],
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn RealtimeTransport>,
        tuning: SessionTuning,
    ) -> Result<RealtimeSession, ChatError> {
        let shared = Arc::new(SessionShared {
            viewer,
            api,
            transport,
            tuning,
            rooms: DashMap::new(),
        });
        let now = now_ms();
        for room_id in room_ids {
            let outcome = shared
                .api
                .history(&shared.viewer.user_id, room_id, None, None)
                .await?;
            let mut state = RoomState {
                viewer_role: outcome.viewer_role,
                participants: outcome.participants.clone(),
                ledger: outcome.read_ledger,
                timeline: Timeline::new(),
                guard: EchoGuard::new(),
                pending_sends: HashMap::new(),
                visibility: VisibilityTracker::new(tuning.visibility),
                typing: TypingPublisher::new(tuning.presence),
                roster: PresenceRoster::new(&shared.viewer.conn_id, &shared.viewer.user_id, tuning.presence.stale_ms),
                poller: FallbackPoller::new(tuning.poll),
                next_sweep_at: now + tuning.presence.sweep_ms,
            };
            for item in &outcome.items {
                state.timeline.insert_server(item.message.clone(), item.reads);
                let eligible = item.message.author_id != shared.viewer.user_id
                    && item.message.kind == MessageKind::Text;
                state.visibility.track(item.message.id, item.message.created_at, eligible);
            }
            if let Some(cursor) = state.timeline.latest_cursor() {
                state.poller.advance_cursor(cursor);
            }
            state.poller.complete(now);
            shared.rooms.insert(room_id.clone(), Mutex::new(state));
            info!("🗨️  Session joined room {} as {}", room_id, outcome.viewer_role.label());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        for room_id in room_ids {
            tasks.push(tokio::spawn(listen_loop(
                shared.clone(),
                room_id.clone(),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(driver_loop(shared.clone(), shutdown_rx)));

        Ok(RealtimeSession { shared, shutdown_tx, tasks: Mutex::new(tasks) })
    }

    /// 发送：先本地回声，后权威落地 / Send: local echo first, authoritative
    /// landing second
    pub async fn send(&self, room_id: &str, content: &str) -> Result<(), ChatError> {
        let body = normalize_body(content);
        if body.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let now = now_ms();
        let fp = fingerprint(room_id, &self.shared.viewer.user_id, &body);
        let typing = self
            .shared
            .with_room(room_id, |state| {
                state.guard.record(fp.clone(), now);
                let message = ChatMessage {
                    id: 0,
                    room_id: room_id.to_string(),
                    author_id: self.shared.viewer.user_id.clone(),
                    author_display: self.shared.viewer.display_name.clone(),
                    author_role: state.viewer_role,
                    body: body.clone(),
                    kind: MessageKind::Text,
                    created_at: now,
                };
                let reads = read_status::compute_status(&message, &state.ledger, &state.participants);
                let local_key = state.timeline.push_local(message, reads);
                state.pending_sends.insert(fp.clone(), local_key);
                state.typing.on_send(now)
            })
            .ok_or_else(|| ChatError::MissingRoom(room_id.to_string()))?;
        if let Some(typing) = typing {
            self.shared.publish_typing(room_id, typing).await;
        }

        match self.shared.api.send(&self.shared.viewer.user_id, room_id, content).await {
            Ok(outcome) => {
                self.shared.with_room(room_id, |state| {
                    if let Some(local_key) = state.pending_sends.remove(&fp) {
                        state.timeline.reconcile_local(
                            local_key,
                            outcome.message_id,
                            outcome.created_at,
                            outcome.read_status,
                        );
                    }
                    state.ledger.merge_newer(&outcome.read_ledger);
                    state.poller.advance_cursor(Cursor { at: outcome.created_at, id: outcome.message_id });
                    state.visibility.track(outcome.message_id, outcome.created_at, false);
                });
                Ok(())
            }
            // 瞬时失败留给调用方的重试动作；乐观行保持 pending
            // Transient failures wait for the caller's retry; the optimistic
            // line stays pending
            Err(e) => Err(e),
        }
    }

    /// 视口采样入口 / Viewport sample intake
    pub fn observe_visibility(
        &self,
        room_id: &str,
        message_id: u64,
        ratio: f64,
        view_focused: bool,
        window_focused: bool,
    ) {
        let sample = VisibilitySample { ratio, view_focused, window_focused };
        self.shared.with_room(room_id, |state| {
            if let Some(watermark) = state.visibility.observe(message_id, sample, now_ms()) {
                advance_optimistic(state, watermark);
            }
        });
    }

    pub async fn composer_input(&self, room_id: &str) {
        let publish = self
            .shared
            .with_room(room_id, |state| state.typing.on_input(now_ms()))
            .flatten();
        if let Some(typing) = publish {
            self.shared.publish_typing(room_id, typing).await;
        }
    }

    pub async fn composer_blur(&self, room_id: &str) {
        let publish = self
            .shared
            .with_room(room_id, |state| state.typing.on_blur(now_ms()))
            .flatten();
        if let Some(typing) = publish {
            self.shared.publish_typing(room_id, typing).await;
        }
    }

    pub fn timeline(&self, room_id: &str) -> Vec<TimelineLine> {
        self.shared
            .with_room(room_id, |state| state.timeline.lines().to_vec())
            .unwrap_or_default()
    }

    pub fn ledger(&self, room_id: &str) -> LedgerSnapshot {
        self.shared.with_room(room_id, |state| state.ledger).unwrap_or_default()
    }

    pub fn typing_names(&self, room_id: &str) -> Vec<String> {
        self.shared
            .with_room(room_id, |state| state.roster.typing_names())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, room_id: &str) -> usize {
        self.shared
            .with_room(room_id, |state| {
                let since = state.ledger.get(state.viewer_role);
                state
                    .timeline
                    .lines()
                    .iter()
                    .filter(|l| !l.pending)
                    .filter(|l| l.message.author_id != self.shared.viewer.user_id)
                    .filter(|l| since.map_or(true, |s| l.message.created_at > s))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_live(&self, room_id: &str) -> bool {
        self.shared.with_room(room_id, |state| state.poller.is_live()).unwrap_or(false)
    }

    /// 关停：取消挂起的去抖写，显式离开存在频道，回收任务
    /// Shutdown: cancel pending debounced writes, leave presence explicitly,
    /// reap the tasks
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        let room_ids: Vec<String> = self.shared.rooms.iter().map(|e| e.key().clone()).collect();
        for room_id in room_ids {
            self.shared.with_room(&room_id, |state| state.visibility.cancel_pending());
            let leave = RoomEvent::Presence(PresenceEvent {
                room_id: room_id.clone(),
                conn_id: self.shared.viewer.conn_id.clone(),
                user_id: self.shared.viewer.user_id.clone(),
                name: self.shared.viewer.display_name.clone(),
                typing: false,
                at: now_ms(),
            });
            let _ = self.shared.transport.publish(leave).await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("👋 Session closed");
    }
}

/// 订阅循环：断线即亮轮询，退避后重挂
/// Subscribe loop: polling lights up on disconnect, reattach after backoff
async fn listen_loop(
    shared: Arc<SessionShared>,
    room_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        match shared.transport.attach(&room_id).await {
            Ok(mut rx) => {
                shared.set_live(&room_id, true);
                info!("📡 Realtime attached for room {}", room_id);
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return;
                            }
                        }
                        event = rx.recv() => match event {
                            Ok(event) => {
                                let wire = event.to_wire();
                                shared.ingest_wire(&room_id, &wire);
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                debug!("Room {} subscriber lagged by {}", room_id, n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Err(e) => {
                warn!("🔌 Realtime attach failed for room {}: {}", room_id, e);
            }
        }
        shared.set_live(&room_id, false);
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(shared.tuning.reattach_ms)) => {}
        }
    }
}

/// 驱动循环：固定节拍驱动驻留计时、去抖、清扫与轮询
/// Driver loop: a fixed tick drives dwell timing, debounce, sweeps, polls
async fn driver_loop(shared: Arc<SessionShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(shared.tuning.tick_ms));
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let follow = shared.tick_all(now_ms());
                shared.run_followups(follow).await;
            }
        }
    }
}
