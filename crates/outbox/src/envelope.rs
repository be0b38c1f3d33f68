//! Event envelope codec.
//!
//! A [`DispatchEvent`] is serialized once at intake time and stored in the
//! outbox as raw bytes. The relay never re-encodes it: it only peeks at the
//! [`EnvelopeHeader`] to find the partition key and forwards the stored
//! bytes untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use notihub_common::error::AppError;
use notihub_common::types::{Channel, NotificationRecord};

/// Current envelope schema version. Bump when the wire shape changes.
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid payload: missing notificationId")]
    MissingKey,
}

impl From<EnvelopeError> for AppError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Malformed(e) => AppError::Encode(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// The event published to the broker for downstream delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEvent {
    pub version: u32,
    pub event_id: Uuid,
    pub notification_id: Uuid,
    pub channel: Channel,
    pub tenant: String,
    pub recipients: Vec<String>,
    pub title: Option<String>,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Informational only; the authoritative count lives on the outbox row.
    pub attempt: i32,
}

impl DispatchEvent {
    /// Build the envelope describing a freshly created notification.
    pub fn for_notification(record: &NotificationRecord) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            event_id: Uuid::new_v4(),
            notification_id: record.id,
            channel: record.channel,
            tenant: record.tenant.clone(),
            recipients: record.recipients.clone(),
            title: record.title.clone(),
            content: record.content.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            attempt: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// The subset of an envelope the relay needs for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub version: u32,
    pub notification_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHeader {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    notification_id: Option<String>,
}

impl EnvelopeHeader {
    /// Extract routing information without decoding the whole event.
    ///
    /// Envelopes written before versioning carry no `version`; they are treated as v1.
    pub fn peek(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawHeader = serde_json::from_slice(payload)?;
        let notification_id = raw
            .notification_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(EnvelopeError::MissingKey)?;

        Ok(Self {
            version: raw.version.unwrap_or(ENVELOPE_VERSION),
            notification_id,
        })
    }
}
