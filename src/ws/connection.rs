use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::PresenceEvent;
use crate::server::{ChatServer, Connection};

// 连接后必须在期限内完成挂接，否则踢出
// The attach frame must arrive within this deadline or the socket is dropped
const ATTACH_DEADLINE_MS: u64 = 3_000;

/// 入站帧 / Inbound frame
#[derive(serde::Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn control_frame(msg_type: &str, data: serde_json::Value) -> String {
    serde_json::json!({ "type": msg_type, "data": data }).to_string()
}

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<ChatServer>,
) -> Result<()> {
    info!("📨 New connection from: {}", peer_addr);
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // 单写者任务，所有出站帧走这条通道 / single writer task; every outbound
    // frame goes through this channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = Uuid::new_v4().to_string();
    let writer_conn_id = conn_id.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                error!("Failed to send to {}: {}", writer_conn_id, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    // 挂接握手：令牌校验在外部协作方 / attach handshake; token validation is
    // the external collaborator's call
    let attach = tokio::time::timeout(
        Duration::from_millis(ATTACH_DEADLINE_MS),
        ws_receiver.next(),
    )
    .await;
    let attach_frame = match attach {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<ClientFrame>(&text).ok(),
        _ => None,
    };
    let Some(frame) = attach_frame.filter(|f| f.msg_type == "attach") else {
        warn!("disconnecting client without attach frame from {}", peer_addr);
        let _ = tx.send(Message::Text(control_frame(
            "error",
            serde_json::json!({"message": "attach required"}),
        )));
        let _ = tx.send(Message::Close(None));
        let _ = writer_task.await;
        return Ok(());
    };

    let token = frame.data.get("token").and_then(|v| v.as_str()).unwrap_or("");
    let uid = frame.data.get("uid").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let requested: Vec<String> = frame
        .data
        .get("rooms")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    if uid.is_empty() || !server.access.check_token(token).await {
        warn!("🔐 Rejecting connection from {}: invalid credential", peer_addr);
        let _ = tx.send(Message::Text(control_frame(
            "error",
            serde_json::json!({"message": "invalid credential"}),
        )));
        let _ = tx.send(Message::Close(None));
        let _ = writer_task.await;
        return Ok(());
    }

    let mut rooms = Vec::new();
    for room_id in requested {
        if server.access.can_access(&uid, &room_id).await {
            rooms.push(room_id);
        }
    }
    if rooms.is_empty() {
        let _ = tx.send(Message::Text(control_frame(
            "error",
            serde_json::json!({"message": "no accessible rooms"}),
        )));
        let _ = tx.send(Message::Close(None));
        let _ = writer_task.await;
        return Ok(());
    }

    let connection = Connection {
        conn_id: conn_id.clone(),
        user_id: uid.clone(),
        addr: peer_addr,
        sender: tx.clone(),
        rooms: rooms.clone(),
        last_heartbeat: Arc::new(std::sync::Mutex::new(Instant::now())),
    };
    server.connections.insert(conn_id.clone(), connection);
    info!("✅ Client {} attached as {} to {:?}", conn_id, uid, rooms);
    let _ = tx.send(Message::Text(control_frame(
        "attached",
        serde_json::json!({ "conn_id": conn_id, "rooms": rooms }),
    )));

    // 每房间一个转发任务：总线事件 -> 套接字 / one forward task per room:
    // bus events -> socket
    let mut forward_tasks = Vec::new();
    for room_id in &rooms {
        let mut bus_rx = server.bus.subscribe(room_id);
        let forward_tx = tx.clone();
        forward_tasks.push(tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(event) => {
                        let wire = event.to_wire().to_string();
                        if forward_tx.send(Message::Text(wire)).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    // 入站帧处理 / inbound frame handling
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                server.update_heartbeat(&conn_id);
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                    warn!("⚠️  Invalid JSON from {}", conn_id);
                    let _ = server.send_to_connection(
                        &conn_id,
                        Message::Text(control_frame("error", serde_json::json!({"message": "invalid JSON"}))),
                    );
                    continue;
                };
                handle_frame(&server, &conn_id, &uid, &rooms, frame).await;
            }
            Ok(Message::Ping(_)) => {
                server.update_heartbeat(&conn_id);
            }
            Ok(Message::Close(frame)) => {
                info!("🔒 Client {} requested close: {:?}", conn_id, frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error from {}: {}", conn_id, e);
                break;
            }
        }
    }

    // 清理：注销连接并广播离开信号，免得等过期清扫
    // Cleanup: unregister and broadcast leave so nobody waits for the sweep
    server.connections.remove(&conn_id);
    for room_id in &rooms {
        server.publish_presence(PresenceEvent {
            room_id: room_id.clone(),
            conn_id: conn_id.clone(),
            user_id: uid.clone(),
            name: String::new(),
            typing: false,
            at: ChatServer::now_ms(),
        });
    }
    for task in forward_tasks {
        task.abort();
    }
    writer_task.abort();
    info!("👋 Client {} disconnected", conn_id);
    Ok(())
}

async fn handle_frame(
    server: &Arc<ChatServer>,
    conn_id: &str,
    uid: &str,
    rooms: &[String],
    frame: ClientFrame,
) {
    match frame.msg_type.as_str() {
        "ping" => {
            debug!("🏓 Ping from {}", conn_id);
            let _ = server.send_to_connection(
                conn_id,
                Message::Text(control_frame(
                    "pong",
                    serde_json::json!({ "timestamp": ChatServer::now_ms(), "conn_id": conn_id }),
                )),
            );
        }
        "presence" => {
            let room_id = frame.data.get("room_id").and_then(|v| v.as_str()).unwrap_or("");
            if !rooms.iter().any(|r| r == room_id) {
                return;
            }
            let typing = frame.data.get("typing").and_then(|v| v.as_bool()).unwrap_or(false);
            let name = frame
                .data
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            server.publish_presence(PresenceEvent {
                room_id: room_id.to_string(),
                conn_id: conn_id.to_string(),
                user_id: uid.to_string(),
                name,
                typing,
                at: ChatServer::now_ms(),
            });
        }
        "read" => {
            let room_id = frame.data.get("room_id").and_then(|v| v.as_str()).unwrap_or("");
            match server.mark_read(uid, room_id).await {
                Ok(outcome) => debug!(
                    "📖 {} marked room {} read over WS (updated={})",
                    uid, room_id, outcome.updated
                ),
                Err(e) => {
                    let _ = server.send_to_connection(
                        conn_id,
                        Message::Text(control_frame("error", serde_json::json!({"message": format!("{}", e)}))),
                    );
                }
            }
        }
        other => {
            warn!("⚠️  Unknown frame type from {}: {}", conn_id, other);
            let _ = server.send_to_connection(
                conn_id,
                Message::Text(control_frame(
                    "error",
                    serde_json::json!({"message": format!("Unknown frame type: {}", other)}),
                )),
            );
        }
    }
}
