//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and listener configuration.
    pub server: ServerConfig,
    /// Token verification configuration.
    pub auth: AuthConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Optional cache-tier configuration (quota/presence snapshots).
    #[serde(default)]
    pub cache: CacheConfig,
    /// Rate limit quotas.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Moderation pipeline configuration.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// Room lifecycle configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines (production).
    Json,
    /// Human-readable output (development).
    Pretty,
}

/// Server identity and listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "chat.palaver.example").
    pub name: String,
    /// Address the realtime (WebSocket) gateway binds to.
    pub listen: SocketAddr,
    /// Address the auxiliary HTTP surface (API, metrics, probes) binds to.
    /// Port 0 picks an ephemeral port; tests rely on that.
    pub http_listen: SocketAddr,
    /// Maximum concurrent client connections (default: 10_000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-connection outbound queue capacity (default: 256).
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// Grace window before a persistently full queue closes the connection,
    /// in milliseconds (default: 2000).
    #[serde(default = "default_slow_consumer_grace_ms")]
    pub slow_consumer_grace_ms: u64,
    /// Heartbeat interval in seconds (default: 30).
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_max_connections() -> usize {
    10_000
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_slow_consumer_grace_ms() -> u64 {
    2_000
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Token verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing key shared with the identity service.
    /// Overridable via `PALAVERD_SIGNING_KEY`.
    #[serde(default)]
    pub signing_key: String,
    /// Expected token issuer.
    pub issuer: String,
    /// How long a verified principal row may be served from cache, in seconds
    /// (default: 30).
    #[serde(default = "default_principal_cache_secs")]
    pub principal_cache_secs: u64,
    /// How often the revocation cache is refreshed, in seconds (default: 30).
    #[serde(default = "default_revocation_refresh_secs")]
    pub revocation_refresh_secs: u64,
}

fn default_principal_cache_secs() -> u64 {
    30
}

fn default_revocation_refresh_secs() -> u64 {
    30
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Primary connection URL or path (all writes go here).
    /// Overridable via `PALAVERD_DATABASE_URL`.
    pub url: String,
    /// Optional read-replica URL; history and statistics reads prefer it.
    #[serde(default)]
    pub replica_url: Option<String>,
    /// Connection pool size (default: 5).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    5
}

/// Cache-tier configuration.
///
/// Holds best-effort snapshots (rate-limit quotas, presence). When no URL is
/// configured the snapshots land in the primary database.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheConfig {
    /// Cache store URL or path.
    #[serde(default)]
    pub url: Option<String>,
    /// Snapshot interval in seconds (default: 30).
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
}

fn default_snapshot_secs() -> u64 {
    30
}

/// Rate limit quotas.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Messages per minute per principal (default: 30).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Messages per 10 seconds per (principal, room) (default: 10).
    #[serde(default = "default_room_messages_per_ten_secs")]
    pub room_messages_per_ten_secs: u32,
    /// Room joins per minute per principal (default: 5).
    #[serde(default = "default_joins_per_minute")]
    pub joins_per_minute: u32,
    /// Room creations per minute for non-premium principals (default: 1).
    #[serde(default = "default_room_creates_per_minute")]
    pub room_creates_per_minute: u32,
    /// Capacity multiplier for premium principals (default: 3).
    #[serde(default = "default_premium_multiplier")]
    pub premium_multiplier: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            room_messages_per_ten_secs: default_room_messages_per_ten_secs(),
            joins_per_minute: default_joins_per_minute(),
            room_creates_per_minute: default_room_creates_per_minute(),
            premium_multiplier: default_premium_multiplier(),
        }
    }
}

fn default_messages_per_minute() -> u32 {
    30
}

fn default_room_messages_per_ten_secs() -> u32 {
    10
}

fn default_joins_per_minute() -> u32 {
    5
}

fn default_room_creates_per_minute() -> u32 {
    1
}

fn default_premium_multiplier() -> u32 {
    3
}

/// Moderation pipeline configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModerationConfig {
    /// Path to the blocked-term dictionary (one term per line; `#` comments).
    #[serde(default)]
    pub dictionary_path: Option<String>,
    /// Regex patterns whose match flags (but does not block) a message.
    #[serde(default)]
    pub flag_patterns: Vec<String>,
    /// Optional external content-analysis endpoint.
    #[serde(default)]
    pub external_endpoint: Option<String>,
    /// Deadline for the external hook, in milliseconds (default: 2000).
    #[serde(default = "default_external_timeout_ms")]
    pub external_timeout_ms: u64,
    /// Reputation score below which stricter rules apply (default: -50).
    #[serde(default = "default_reputation_threshold")]
    pub reputation_threshold: i32,
    /// Links per message above which content is flagged as spam (default: 3).
    #[serde(default = "default_max_links")]
    pub max_links: usize,
}

fn default_external_timeout_ms() -> u64 {
    2_000
}

fn default_reputation_threshold() -> i32 {
    -50
}

fn default_max_links() -> usize {
    3
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Days without messages before an active room flips to inactive
    /// (default: 30). Direct conversations are exempt.
    #[serde(default = "default_inactive_after_days")]
    pub inactive_after_days: u32,
    /// Default member cap for newly created rooms (default: 256).
    #[serde(default = "default_max_members")]
    pub default_max_members: u32,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            inactive_after_days: default_inactive_after_days(),
            default_max_members: default_max_members(),
        }
    }
}

fn default_inactive_after_days() -> u32 {
    30
}

fn default_max_members() -> u32 {
    256
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// `PALAVERD_SIGNING_KEY` and `PALAVERD_DATABASE_URL` take precedence over
    /// the file so secrets can stay out of it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        if let Ok(key) = std::env::var("PALAVERD_SIGNING_KEY") {
            config.auth.signing_key = key;
        }
        if let Ok(url) = std::env::var("PALAVERD_DATABASE_URL") {
            config.database.url = url;
        }

        Ok(config)
    }
}

/// Validate a loaded configuration, returning every problem found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push("server.name must not be empty".to_string());
    }
    if config.auth.signing_key.len() < 32 {
        errors.push(format!(
            "auth.signing_key must be at least 32 characters (got {})",
            config.auth.signing_key.len()
        ));
    }
    if config.auth.issuer.is_empty() {
        errors.push("auth.issuer must not be empty".to_string());
    }
    if config.database.url.is_empty() {
        errors.push("database.url must not be empty".to_string());
    }
    if config.server.send_queue_capacity == 0 {
        errors.push("server.send_queue_capacity must be at least 1".to_string());
    }
    if config.limits.messages_per_minute == 0 || config.limits.room_messages_per_ten_secs == 0 {
        errors.push("rate limit quotas must be non-zero".to_string());
    }
    for (i, pattern) in config.moderation.flag_patterns.iter().enumerate() {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(format!("moderation.flag_patterns[{i}] is invalid: {e}"));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[server]
name = "test.palaver"
listen = "127.0.0.1:7400"
http_listen = "127.0.0.1:0"

[auth]
signing_key = "0123456789abcdef0123456789abcdef"
issuer = "palaver-test"

[database]
url = ":memory:"
"#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.server.send_queue_capacity, 256);
        assert_eq!(config.server.heartbeat_secs, 30);
        assert_eq!(config.limits.messages_per_minute, 30);
        assert_eq!(config.limits.premium_multiplier, 3);
        assert_eq!(config.rooms.default_max_members, 256);
        assert!(config.cache.url.is_none());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn short_signing_key_fails_validation() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.auth.signing_key = "short".to_string();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("signing_key")));
    }

    #[test]
    fn invalid_flag_pattern_fails_validation() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.moderation.flag_patterns = vec!["(unclosed".to_string()];
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("flag_patterns")));
    }
}
