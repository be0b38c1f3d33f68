use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

impl Channel {
    /// EMAIL and PUSH render a title; SMS does not.
    pub fn requires_title(&self) -> bool {
        matches!(self, Channel::Email | Channel::Push)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "SMS"),
            Channel::Email => write!(f, "EMAIL"),
            Channel::Push => write!(f, "PUSH"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SMS" => Ok(Channel::Sms),
            "EMAIL" => Ok(Channel::Email),
            "PUSH" => Ok(Channel::Push),
            _ => Err(r#"channel must be one of: "SMS","EMAIL","PUSH""#.to_string()),
        }
    }
}

/// Business-visible status of a notification.
///
/// `Queued` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Queued,
    Sent,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Queued => write!(f, "QUEUED"),
            NotificationStatus::Sent => write!(f, "SENT"),
            NotificationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status of an outbox row.
///
/// `Pending` marks a row waiting out a retry backoff. Both `Queued` and
/// `Pending` rows are claimable once `next_attempt_at` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Queued,
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Failed)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Queued => write!(f, "QUEUED"),
            OutboxStatus::Pending => write!(f, "PENDING"),
            OutboxStatus::Published => write!(f, "PUBLISHED"),
            OutboxStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A row of the `notification` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub tenant: String,
    pub channel: Channel,
    pub recipients: Vec<String>,
    pub title: Option<String>,
    pub content: String,
    pub metadata: serde_json::Value,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row of the `outbox` table. Shares its `id` with the owning notification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
