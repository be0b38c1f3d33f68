use std::time::Duration;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the intake API listens on (default: 8080)
    pub http_port: u16,

    /// Deployment label ("dev" | "staging" | "prod")
    pub app_env: String,

    /// Comma-separated Kafka bootstrap servers
    pub kafka_brokers: String,

    /// Topic every dispatch event is published to
    pub kafka_topic: String,

    /// Maximum outbox rows claimed per poll cycle (default: 100)
    pub outbox_batch_size: u32,

    /// Lease applied to claimed rows, in seconds (default: 30)
    pub outbox_lease_secs: u64,

    /// Sleep between polls when nothing is due, in milliseconds (default: 1000)
    pub outbox_poll_interval_ms: u64,

    /// Pause after a failed claim transaction, in milliseconds (default: 1000)
    pub outbox_claim_retry_ms: u64,

    /// Deadline for a single broker acknowledgment, in milliseconds (default: 10000)
    pub publish_timeout_ms: u64,

    /// Deadline for the intake transaction, in milliseconds (default: 3000)
    pub intake_timeout_ms: u64,

    /// Time allowed to drain a claimed batch after shutdown is requested (default: 30)
    pub shutdown_grace_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            http_port: parse_var("HTTP_PORT", "8080")?,
            app_env: std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
            kafka_brokers: std::env::var("KAFKA_BROKERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            kafka_topic: std::env::var("KAFKA_TOPIC")
                .unwrap_or_else(|_| "notifications".to_string()),
            outbox_batch_size: parse_var("OUTBOX_BATCH_SIZE", "100")?,
            outbox_lease_secs: parse_var("OUTBOX_LEASE_SECS", "30")?,
            outbox_poll_interval_ms: parse_var("OUTBOX_POLL_INTERVAL_MS", "1000")?,
            outbox_claim_retry_ms: parse_var("OUTBOX_CLAIM_RETRY_MS", "1000")?,
            publish_timeout_ms: parse_var("PUBLISH_TIMEOUT_MS", "10000")?,
            intake_timeout_ms: parse_var("INTAKE_TIMEOUT_MS", "3000")?,
            shutdown_grace_secs: parse_var("SHUTDOWN_GRACE_SECS", "30")?,
        })
    }

    pub fn intake_timeout(&self) -> Duration {
        Duration::from_millis(self.intake_timeout_ms)
    }
}

/// Read `key` from the environment, falling back to `default`, and parse it.
fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        })
}
