//! 统一配置中心
//!
//! 提供实时推送服务的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 数据库连接
//! - 实时通道（WebSocket / SSE / 频道树）参数
//! - 移动推送批处理参数
//!
//! 加载顺序：默认值 -> 可选的 `config.toml`（或 `TRAQ_CONFIG_FILE` 指定的文件）-> `TRAQ_` 前缀环境变量。

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// JWT认证配置
    #[serde(default)]
    pub jwt: JwtConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 实时通道配置
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// 移动推送配置
    #[serde(default)]
    pub push: PushConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
            expiration_hours: 24,
        }
    }
}

/// 数据库配置
///
/// 未设置 `url` 时使用内存仓储。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// 实时通道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// 对外访问地址，用于拼接图标、缩略图URL以及解析消息内嵌链接
    pub origin: String,
    /// 公开频道树最大深度
    pub max_channel_depth: usize,
    /// 单个 WebSocket 会话的发送队列长度
    pub ws_buffer_size: usize,
    #[serde(with = "duration_ms")]
    pub ws_write_wait: Duration,
    #[serde(with = "duration_ms")]
    pub ws_pong_wait: Duration,
    #[serde(with = "duration_ms")]
    pub ws_ping_period: Duration,
    /// 客户端单帧最大字节数
    pub ws_max_read_message_size: usize,
    pub sse_buffer_size: usize,
    #[serde(with = "duration_ms")]
    pub sse_keepalive: Duration,
    /// 事件总线订阅者默认缓冲
    pub hub_subscriber_buffer: usize,
    pub message_cache_size: usize,
    #[serde(with = "duration_ms")]
    pub message_cache_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub stamp_throttle_interval: Duration,
    #[serde(with = "duration_ms")]
    pub stamp_throttle_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub viewer_gc_interval: Duration,
    /// 单个频道置顶消息上限
    pub pin_limit: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            max_channel_depth: 5,
            ws_buffer_size: 256,
            ws_write_wait: Duration::from_secs(10),
            ws_pong_wait: Duration::from_secs(60),
            ws_ping_period: Duration::from_secs(54),
            ws_max_read_message_size: 512,
            sse_buffer_size: 100,
            sse_keepalive: Duration::from_secs(10),
            hub_subscriber_buffer: 200,
            message_cache_size: 512,
            message_cache_ttl: Duration::from_secs(60),
            stamp_throttle_interval: Duration::from_secs(1),
            stamp_throttle_ttl: Duration::from_secs(5),
            viewer_gc_interval: Duration::from_secs(5 * 60),
            pin_limit: 100,
        }
    }
}

/// 移动推送配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub enabled: bool,
    /// 批量发送接口地址
    pub endpoint: String,
    pub server_key: String,
    pub batch_size: usize,
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,
    #[serde(with = "duration_ms")]
    pub message_ttl: Duration,
    pub body_max_runes: usize,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://fcm.googleapis.com/batch".to_string(),
            server_key: String::new(),
            batch_size: 500,
            flush_interval: Duration::from_millis(250),
            message_ttl: Duration::from_secs(2 * 24 * 60 * 60),
            body_max_runes: 100,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的顺序加载并验证配置
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("TRAQ_CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::figment(&path).extract::<Self>()?.validated()
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TRAQ_").split("__"))
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.is_empty() {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "database url cannot be empty".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "max connections must be greater than 0".to_string(),
                ));
            }
        }

        let rt = &self.realtime;
        if rt.max_channel_depth == 0 {
            return Err(ConfigError::InvalidRealtimeConfig(
                "max_channel_depth must be greater than 0".to_string(),
            ));
        }
        if rt.ws_buffer_size == 0 || rt.sse_buffer_size == 0 || rt.hub_subscriber_buffer == 0 {
            return Err(ConfigError::InvalidRealtimeConfig(
                "buffer sizes must be greater than 0".to_string(),
            ));
        }
        if rt.ws_ping_period >= rt.ws_pong_wait {
            return Err(ConfigError::InvalidRealtimeConfig(
                "ws_ping_period must be shorter than ws_pong_wait".to_string(),
            ));
        }
        if rt.stamp_throttle_interval.is_zero() || rt.stamp_throttle_ttl.is_zero() {
            return Err(ConfigError::InvalidRealtimeConfig(
                "stamp throttle durations must be positive".to_string(),
            ));
        }
        if !rt.origin.starts_with("http://") && !rt.origin.starts_with("https://") {
            return Err(ConfigError::InvalidRealtimeConfig(format!(
                "origin must be an http(s) url: {}",
                rt.origin
            )));
        }

        if self.push.enabled {
            if self.push.batch_size == 0 || self.push.batch_size > 500 {
                return Err(ConfigError::InvalidPushConfig(
                    "batch_size must be between 1 and 500".to_string(),
                ));
            }
            if self.push.endpoint.is_empty() {
                return Err(ConfigError::InvalidPushConfig(
                    "endpoint is required when push is enabled".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid realtime configuration: {0}")]
    InvalidRealtimeConfig(String),
    #[error("Invalid push configuration: {0}")]
    InvalidPushConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

/// 以毫秒整数序列化 `Duration`
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_match_realtime_constants() {
        let config = AppConfig::default();
        assert_eq!(config.realtime.max_channel_depth, 5);
        assert_eq!(config.realtime.ws_buffer_size, 256);
        assert_eq!(config.realtime.ws_ping_period, Duration::from_secs(54));
        assert_eq!(config.realtime.ws_pong_wait, Duration::from_secs(60));
        assert_eq!(config.push.batch_size, 500);
        assert_eq!(config.push.message_ttl, Duration::from_secs(172_800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_merges_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [server]
                host = "0.0.0.0"
                port = 8080

                [realtime]
                origin = "https://q.example.com"
                stamp_throttle_interval = 500
                "#,
            )?;
            jail.set_env("TRAQ_REALTIME__WS_BUFFER_SIZE", "64");

            let config = AppConfig::load().expect("load config");
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.realtime.origin, "https://q.example.com");
            assert_eq!(
                config.realtime.stamp_throttle_interval,
                Duration::from_millis(500)
            );
            assert_eq!(config.realtime.ws_buffer_size, 64);
            // 未覆盖的字段保持默认值
            assert_eq!(config.realtime.pin_limit, 100);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_short_secret() {
        let mut config = AppConfig::default();
        config.jwt.secret = "short".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 32"));
    }

    #[test]
    fn test_validation_rejects_ping_after_pong() {
        let mut config = AppConfig::default();
        config.realtime.ws_ping_period = Duration::from_secs(90);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRealtimeConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_oversized_push_batch() {
        let mut config = AppConfig::default();
        config.push.enabled = true;
        config.push.batch_size = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPushConfig(_))
        ));
    }
}
