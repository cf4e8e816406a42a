use anyhow::Result;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LimitsConfig {
    pub history_default: usize,
    pub history_max: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig { history_default: 50, history_max: 200 }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    pub token_required: bool,
}

/// 房间参与者条目，访问控制静态实现的数据源
/// Room participant entry feeding the static access implementation
#[derive(Clone, Debug, Deserialize)]
pub struct RoomEntry {
    pub room_id: String,
    pub client: Option<String>,
    pub pm: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub rooms: Vec<RoomEntry>,
}

/// 加载配置：文件 + CHAT_SYNC_* 环境变量覆盖
/// Load configuration: file plus CHAT_SYNC_* env overrides
pub fn load(path: &str) -> Result<Settings> {
    let cfg = config::Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.ws_port", 5210_i64)?
        .set_default("server.http_port", 8090_i64)?
        .set_default("server.timeout_ms", 10000_i64)?
        .set_default("limits.history_default", 50_i64)?
        .set_default("limits.history_max", 200_i64)?
        .set_default("auth.token_required", false)?
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("CHAT_SYNC").separator("__"))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = load("config/__does_not_exist__").unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.limits.history_max, 200);
        assert!(!settings.auth.token_required);
        assert!(settings.rooms.is_empty());
    }
}
