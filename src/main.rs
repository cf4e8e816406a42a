use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use chat_sync::config;
use chat_sync::domain::RoomParticipants;
use chat_sync::init_tracing;
use chat_sync::server::ChatServer;
use chat_sync::service::StaticAccess;
use chat_sync::{router, tasks, ws};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "chat-sync realtime chat synchronization engine", long_about = None)]
pub struct Args {
    /// 指定配置文件路径 / Specify config file path
    #[arg(short = 'c', long = "config", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    info!("🎯 Starting chat-sync (HTTP + WebSocket)...");

    let settings = config::load(&args.config)?;
    info!("🔧 Loaded config: {}", args.config);

    // 访问控制协作方：静态配置实现 / access collaborator: the static
    // config-backed implementation
    let access = Arc::new(StaticAccess::new(settings.auth.token_required));
    for admin in &settings.admins {
        access.grant_admin(admin);
    }
    for room in &settings.rooms {
        access.insert_room(RoomParticipants {
            room_id: room.room_id.clone(),
            client_user_id: room.client.clone(),
            pm_user_id: room.pm.clone(),
        });
    }
    info!("🏠 {} rooms configured, {} admins", settings.rooms.len(), settings.admins.len());

    let server = Arc::new(ChatServer::new(access).with_limits(settings.limits.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tasks::heartbeat::spawn_cleanup_task(
        server.clone(),
        settings.server.timeout_ms,
        shutdown_rx.clone(),
    );

    let ws_server = server.clone();
    let ws_host = settings.server.host.clone();
    let ws_port = settings.server.ws_port;
    tokio::spawn(async move {
        if let Err(e) = ws::server::run(ws_server, ws_host, ws_port, shutdown_rx).await {
            error!("❌ WS listener failed: {}", e);
        }
    });

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let addr = format!("{}:{}", settings.server.host, settings.server.http_port);
    info!("🌐 HTTP API listening on http://{}", addr);
    HttpServer::new(move || {
        App::new()
            .wrap(
                actix_web::middleware::DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Headers", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS")),
            )
            .app_data(web::Data::new(server.clone()))
            .configure(router::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
