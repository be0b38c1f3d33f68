//! Status reconciler: writes a dispatch outcome back to storage.
//!
//! | outcome   | outbox                          | notification |
//! |-----------|---------------------------------|--------------|
//! | Published | PUBLISHED                       | SENT         |
//! | Retryable | PENDING, attempt+1, backoff     | unchanged    |
//! | Terminal  | FAILED                          | FAILED       |
//!
//! Outbox and notification updates for one entry share a transaction. Only
//! non-terminal rows are touched, so a duplicate publish after lease expiry
//! can never rewrite an outcome that was already recorded.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::claim::ClaimedEntry;
use crate::dispatcher::DispatchOutcome;

/// Where one claimed entry ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Published,
    RetryScheduled { attempt: i32, delay: Duration },
    Failed,
    /// The row was already terminal, or another claimer holds it now.
    Stale,
    /// The lease ran out before the publish started. Nothing was sent or
    /// written; the next claimer picks the row up.
    Expired,
}

pub struct Reconciler {
    pool: PgPool,
    backoff: BackoffPolicy,
}

impl Reconciler {
    pub fn new(pool: PgPool, backoff: BackoffPolicy) -> Self {
        Self { pool, backoff }
    }

    pub async fn apply(
        &self,
        entry: &ClaimedEntry,
        outcome: &DispatchOutcome,
    ) -> Result<Resolution, sqlx::Error> {
        match outcome {
            DispatchOutcome::Published => self.mark_published(entry.id).await,
            DispatchOutcome::Retryable(reason) => self.schedule_retry(entry, reason).await,
            DispatchOutcome::Terminal(reason) => self.mark_failed(entry.id, reason).await,
        }
    }

    async fn mark_published(&self, id: Uuid) -> Result<Resolution, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PUBLISHED', last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('QUEUED', 'PENDING')
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Resolution::Stale);
        }

        sqlx::query(
            "UPDATE notification SET status = 'SENT', updated_at = NOW() WHERE id = $1 AND status = 'QUEUED'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Resolution::Published)
    }

    /// Push the row back with a backoff. Requires that this claim still holds
    /// the lease, so a re-claim by another poller is left alone.
    async fn schedule_retry(
        &self,
        entry: &ClaimedEntry,
        reason: &str,
    ) -> Result<Resolution, sqlx::Error> {
        let attempt = entry.attempt_count.saturating_add(1);
        let delay = self.backoff.delay(attempt.max(0) as u32);

        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE outbox
            SET status = 'PENDING',
                attempt_count = attempt_count + 1,
                next_attempt_at = NOW() + make_interval(secs => $2),
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('QUEUED', 'PENDING')
              AND next_attempt_at = $4
            RETURNING attempt_count
            "#,
        )
        .bind(entry.id)
        .bind(delay.as_secs_f64())
        .bind(reason)
        .bind(entry.lease_expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((attempt,)) => Resolution::RetryScheduled { attempt, delay },
            None => Resolution::Stale,
        })
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<Resolution, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'FAILED', last_error = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('QUEUED', 'PENDING')
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Resolution::Stale);
        }

        sqlx::query(
            "UPDATE notification SET status = 'FAILED', updated_at = NOW() WHERE id = $1 AND status = 'QUEUED'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Resolution::Failed)
    }
}
