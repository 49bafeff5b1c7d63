use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub accounts_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Base URL of the render service that produces post images and captions.
    pub render_base_url: String,
    pub render_timeout_secs: u64,
    /// Additional immediate render attempts after the first failure.
    pub render_max_retries: u32,
    /// Base URL of the social platform publish API.
    pub platform_base_url: String,
    pub platform_token: Option<String>,
    pub platform_timeout_secs: u64,
    /// Total publish attempts per job before a post or group fails permanently.
    pub publish_max_attempts: u32,
    /// Base delay for publish retry backoff: `base * 2^retry_count` seconds.
    pub publish_retry_base_secs: u64,
    pub worker_concurrency: usize,
    /// Minimum ready members required before a carousel may be triggered.
    pub min_carousel_items: i64,
    /// Cron expression for the recovery sweep (`tokio-cron-scheduler` syntax).
    pub recovery_cron: String,
    /// Age after which a full-but-untriggered batch group is considered stale.
    pub recovery_staleness_secs: i64,
    /// Maximum render backfill calls per recovery sweep.
    pub recovery_backfill_limit: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("accounts_path", &self.accounts_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("render_base_url", &self.render_base_url)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("render_max_retries", &self.render_max_retries)
            .field("platform_base_url", &self.platform_base_url)
            .field(
                "platform_token",
                &self.platform_token.as_ref().map(|_| "[redacted]"),
            )
            .field("platform_timeout_secs", &self.platform_timeout_secs)
            .field("publish_max_attempts", &self.publish_max_attempts)
            .field("publish_retry_base_secs", &self.publish_retry_base_secs)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("min_carousel_items", &self.min_carousel_items)
            .field("recovery_cron", &self.recovery_cron)
            .field("recovery_staleness_secs", &self.recovery_staleness_secs)
            .field("recovery_backfill_limit", &self.recovery_backfill_limit)
            .finish()
    }
}
