use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::server::ChatServer;

/// 启动WS监听 / Start the WS listener
pub async fn run(
    server: Arc<ChatServer>,
    host: String,
    port: u16,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🚀 chat-sync WebSocket bridge listening on {}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer_addr)) = accepted else { continue };
                let server = server.clone();
                tokio::spawn(async move {
                    if let Err(e) = crate::ws::connection::handle_connection(stream, peer_addr, server).await {
                        error!("Connection error from {}: {}", peer_addr, e);
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("🛑 WS listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}
