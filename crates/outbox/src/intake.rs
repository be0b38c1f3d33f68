//! Atomic intake: records a notification and its outbox event in one transaction.
//!
//! Either both the `notification` row and the `outbox` row commit, or neither
//! does. There is no window in which a notification exists whose event was
//! never persisted for publication.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::time::Instant;
use uuid::Uuid;

use notihub_common::error::AppError;
use notihub_common::types::{Channel, NotificationRecord, NotificationStatus};

use crate::envelope::DispatchEvent;

/// Tenant assigned when the caller does not name one.
pub const DEFAULT_TENANT: &str = "default";

/// SQLSTATE raised when `statement_timeout` cancels a statement.
const QUERY_CANCELED: &str = "57014";

/// Service layer for queuing notifications.
pub struct IntakeService;

/// Parameters for creating a notification, as received from the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNotificationParams {
    #[serde(default)]
    pub channel: String,
    #[serde(default, rename = "to", alias = "recipients")]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Response returned once a notification is durably queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNotificationResponse {
    pub status: NotificationStatus,
    pub id: Uuid,
}

/// A request that passed validation, normalised for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedNotification {
    pub channel: Channel,
    pub recipients: Vec<String>,
    pub title: Option<String>,
    pub content: String,
    pub tenant: String,
    pub metadata: serde_json::Value,
}

impl IntakeService {
    /// Check a request and normalise it. Errors are always `AppError::Validation`.
    pub fn validate(params: &CreateNotificationParams) -> Result<ValidatedNotification, AppError> {
        let channel: Channel = params.channel.parse().map_err(AppError::Validation)?;

        if params.recipients.is_empty() {
            return Err(AppError::Validation(
                "to must contain at least one recipient".to_string(),
            ));
        }
        if params.recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(AppError::Validation(
                "recipients must not be blank".to_string(),
            ));
        }
        if params.content.trim().is_empty() {
            return Err(AppError::Validation("content is required".to_string()));
        }

        let title = params
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if channel.requires_title() && title.is_none() {
            return Err(AppError::Validation(
                "title is required for EMAIL/PUSH".to_string(),
            ));
        }

        let metadata = match &params.metadata {
            None | Some(serde_json::Value::Null) => serde_json::json!({}),
            Some(value @ serde_json::Value::Object(_)) => value.clone(),
            Some(_) => {
                return Err(AppError::Validation(
                    "metadata must be a JSON object".to_string(),
                ));
            }
        };

        let tenant = params
            .tenant
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TENANT)
            .to_string();

        Ok(ValidatedNotification {
            channel,
            recipients: params.recipients.clone(),
            title,
            content: params.content.clone(),
            tenant,
            metadata,
        })
    }

    /// Validate, then atomically persist the notification and its outbox entry.
    ///
    /// `timeout` is a deadline for the two inserts. If it passes before the
    /// inserts finish, the transaction is dropped (rolled back) and
    /// `AppError::Timeout` is returned. `COMMIT` is never abandoned from the
    /// client side: it runs under the remaining budget as a server-side
    /// `statement_timeout`, so an expired commit is rolled back by Postgres
    /// and a `Timeout` is only returned when nothing was written.
    pub async fn queue(
        pool: &PgPool,
        params: &CreateNotificationParams,
        timeout: Duration,
    ) -> Result<CreateNotificationResponse, AppError> {
        let validated = Self::validate(params)?;
        let record = Self::new_record(validated);
        let payload = DispatchEvent::for_notification(&record).encode()?;

        Self::insert_within(pool, &record, &payload, timeout).await?;

        tracing::info!(
            notification_id = %record.id,
            channel = %record.channel,
            tenant = %record.tenant,
            recipients = record.recipients.len(),
            "Notification queued"
        );

        Ok(CreateNotificationResponse {
            status: NotificationStatus::Queued,
            id: record.id,
        })
    }

    async fn insert_within(
        pool: &PgPool,
        record: &NotificationRecord,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), AppError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || {
            AppError::Timeout(format!(
                "failed to queue: transaction exceeded {}ms",
                timeout.as_millis()
            ))
        };

        let staged = tokio::time::timeout_at(deadline, async {
            let mut tx = pool.begin().await?;
            set_statement_timeout(&mut tx, timeout).await?;
            Self::insert_rows(&mut tx, record, payload).await?;
            Ok::<_, sqlx::Error>(tx)
        })
        .await
        .map_err(|_| timed_out())?;
        let mut tx = staged.map_err(|e| classify_write_error(e, &timed_out))?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out());
        }
        set_statement_timeout(&mut tx, remaining)
            .await
            .map_err(|e| classify_write_error(e, &timed_out))?;

        tx.commit()
            .await
            .map_err(|e| classify_write_error(e, &timed_out))
    }

    /// Assign an identifier and timestamps to a validated request.
    pub fn new_record(validated: ValidatedNotification) -> NotificationRecord {
        let now = Utc::now();
        NotificationRecord {
            id: Uuid::new_v4(),
            tenant: validated.tenant,
            channel: validated.channel,
            recipients: validated.recipients,
            title: validated.title,
            content: validated.content,
            metadata: validated.metadata,
            status: NotificationStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert both rows inside a single transaction.
    ///
    /// The outbox row reuses the notification id and is due immediately.
    pub async fn insert_notification_and_outbox(
        pool: &PgPool,
        record: &NotificationRecord,
        payload: &[u8],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        Self::insert_rows(&mut tx, record, payload).await?;
        tx.commit().await
    }

    async fn insert_rows(
        tx: &mut Transaction<'_, Postgres>,
        record: &NotificationRecord,
        payload: &[u8],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notification (id, tenant, channel, recipients, title, content, status, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant)
        .bind(record.channel)
        .bind(&record.recipients)
        .bind(&record.title)
        .bind(&record.content)
        .bind(NotificationStatus::Queued)
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO outbox (id, payload, status, attempt_count, next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, 'QUEUED', 0, NOW(), NOW(), NOW())
            "#,
        )
        .bind(record.id)
        .bind(payload)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Fetch a notification by id.
    pub async fn get(pool: &PgPool, id: Uuid) -> Result<NotificationRecord, AppError> {
        sqlx::query_as::<_, NotificationRecord>("SELECT * FROM notification WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }
}

/// Bound every following statement of `tx`, `COMMIT` included, on the server.
async fn set_statement_timeout(
    tx: &mut Transaction<'_, Postgres>,
    budget: Duration,
) -> Result<(), sqlx::Error> {
    // Zero disables the limit, so never round down to it.
    let millis = budget.as_millis().max(1);
    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(millis.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// A server-side cancellation means the deadline passed and Postgres rolled
/// the transaction back.
fn classify_write_error(err: sqlx::Error, timed_out: impl Fn() -> AppError) -> AppError {
    let cancelled = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == QUERY_CANCELED);
    if cancelled {
        timed_out()
    } else {
        AppError::Queue(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms(content: &str) -> CreateNotificationParams {
        CreateNotificationParams {
            channel: "sms".to_string(),
            recipients: vec!["+15550100".to_string()],
            content: content.to_string(),
            ..Default::default()
        }
    }

    fn assert_validation(params: &CreateNotificationParams, needle: &str) {
        match IntakeService::validate(params) {
            Err(AppError::Validation(msg)) => assert!(msg.contains(needle), "got: {}", msg),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_sms_defaults() {
        let v = IntakeService::validate(&sms("hello")).unwrap();
        assert_eq!(v.channel, Channel::Sms);
        assert_eq!(v.tenant, DEFAULT_TENANT);
        assert_eq!(v.title, None);
        assert_eq!(v.metadata, serde_json::json!({}));
    }

    #[test]
    fn test_validate_blank_title_becomes_none() {
        let mut params = sms("hello");
        params.title = Some("   ".to_string());
        params.tenant = Some("  ".to_string());
        let v = IntakeService::validate(&params).unwrap();
        assert_eq!(v.title, None);
        assert_eq!(v.tenant, DEFAULT_TENANT);
    }

    #[test]
    fn test_validate_rejects_unknown_channel() {
        let mut params = sms("hello");
        params.channel = "pigeon".to_string();
        assert_validation(&params, "channel must be one of");
    }

    #[test]
    fn test_validate_rejects_empty_recipients() {
        let mut params = sms("hello");
        params.recipients.clear();
        assert_validation(&params, "at least one recipient");
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        assert_validation(&sms("  "), "content is required");
    }

    #[test]
    fn test_validate_requires_title_for_email_and_push() {
        for channel in ["EMAIL", "push"] {
            let mut params = sms("hello");
            params.channel = channel.to_string();
            assert_validation(&params, "title is required");

            params.title = Some("Subject".to_string());
            assert!(IntakeService::validate(&params).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_non_object_metadata() {
        let mut params = sms("hello");
        params.metadata = Some(serde_json::json!([1, 2]));
        assert_validation(&params, "metadata");
    }

    #[test]
    fn test_params_accept_to_and_recipients() {
        let a: CreateNotificationParams =
            serde_json::from_str(r#"{"channel":"SMS","to":["+1"],"content":"x"}"#).unwrap();
        let b: CreateNotificationParams =
            serde_json::from_str(r#"{"channel":"SMS","recipients":["+1"],"content":"x"}"#)
                .unwrap();
        assert_eq!(a.recipients, b.recipients);
    }

    #[test]
    fn test_new_record_starts_queued() {
        let v = IntakeService::validate(&sms("hello")).unwrap();
        let record = IntakeService::new_record(v);
        assert_eq!(record.status, NotificationStatus::Queued);
        assert_eq!(record.created_at, record.updated_at);
    }
}
